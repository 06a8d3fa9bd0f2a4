//! Bundle distribution cache.
//!
//! Local store keyed by `bundle_id`: `<root>/<bundle_id>/` is a complete,
//! verified bundle or does not exist. On a miss the archive
//! (`<origin>/<bundle_id>.tar.gz`) is fetched, its SHA-256 compared against
//! the expected digest, unpacked into a staging directory inside the cache
//! root and renamed into place. Readers therefore never see a partially
//! unpacked bundle; a resolver that loses the rename race discards its
//! staging copy and uses the winner's.
//!
//! Entries are trusted once present and never re-verified or evicted.
//!
//! Unpacking is bounded: an archive with more than
//! [`DEFAULT_MAX_ENTRIES`] entries, or whose entries declare more than
//! [`DEFAULT_MAX_UNPACKED_SIZE`] bytes in total, is rejected as
//! structurally invalid.

use std::fs;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::bundle::{BundleManifest, MANIFEST_FILE};
use crate::error::BundleError;
use crate::gate::suite::SUITES_DIR;
use crate::{fs_safe, ids};

/// FAQ data file every bundle must ship.
pub const FAQ_DATA_FILE: &str = "data/faq.json";

/// Default cap on the summed size of all archive entries.
pub const DEFAULT_MAX_UNPACKED_SIZE: u64 = 1024 * 1024 * 1024;

/// Default cap on the number of archive entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

// Headers, padding and extension records per entry on top of its data.
const ENTRY_OVERHEAD: u64 = 4096;

const DIGEST_PREFIX: &str = "sha256:";
const STAGING_PREFIX: &str = ".staging-";

/// A SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContentDigest([u8; 32]);

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl ContentDigest {
    /// Parse 64 hex characters, optionally prefixed with `sha256:`.
    pub fn parse(text: &str) -> Result<Self, BundleError> {
        let hex_part = text.trim();
        let hex_part = hex_part.strip_prefix(DIGEST_PREFIX).unwrap_or(hex_part);
        let mut out = [0u8; 32];
        hex::decode_to_slice(hex_part, &mut out).map_err(|_| BundleError::InvalidDigest {
            detail: "expected 64 hex characters, optionally prefixed with sha256:".to_string(),
        })?;
        Ok(Self(out))
    }

    /// Digest of `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time equality.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

/// Where archives come from.
pub trait BundleOrigin: Send + Sync {
    /// Fetch the archive for `bundle_id`. Missing, unreachable or timed out
    /// is [`BundleError::OriginUnavailable`].
    fn fetch(&self, bundle_id: &str) -> impl Future<Output = Result<Vec<u8>, BundleError>> + Send;
}

/// How a cache lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Already present.
    Hit,
    /// Fetched, verified and installed by this call.
    Miss,
}

impl CacheStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// A bundle available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBundle {
    /// Bundle id.
    pub bundle_id: String,
    /// Bundle directory inside the cache.
    pub path: PathBuf,
    /// Hit or miss.
    pub status: CacheStatus,
}

/// Filesystem bundle cache.
#[derive(Debug, Clone)]
pub struct BundleCache {
    root: PathBuf,
    max_unpacked_size: u64,
    max_entries: usize,
}

impl BundleCache {
    /// Cache rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_unpacked_size: DEFAULT_MAX_UNPACKED_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Override the unpack bounds.
    #[must_use]
    pub fn with_unpack_limits(mut self, max_unpacked_size: u64, max_entries: usize) -> Self {
        self.max_unpacked_size = max_unpacked_size;
        self.max_entries = max_entries;
        self
    }

    /// Cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cached bundle, if present.
    pub fn lookup(&self, bundle_id: &str) -> Result<Option<PathBuf>, BundleError> {
        ids::bundle(bundle_id)?;
        let path = self.root.join(bundle_id);
        fs_safe::reject_symlink(&path)?;
        Ok(path.is_dir().then_some(path))
    }

    /// Make `bundle_id` available locally, fetching from `origin` on a miss.
    ///
    /// `expected_digest` only matters on a miss; a cached entry is served
    /// without looking at it.
    pub async fn ensure_local<O: BundleOrigin>(
        &self,
        bundle_id: &str,
        expected_digest: Option<&str>,
        origin: Option<&O>,
    ) -> Result<CachedBundle, BundleError> {
        if let Some(path) = self.lookup(bundle_id)? {
            tracing::debug!(bundle_id, "bundle cache hit");
            return Ok(CachedBundle {
                bundle_id: bundle_id.to_string(),
                path,
                status: CacheStatus::Hit,
            });
        }

        let expected = expected_digest.map(ContentDigest::parse).transpose()?;
        let origin = origin.ok_or_else(|| BundleError::Config {
            detail: format!("bundle {bundle_id} not cached and no origin configured"),
        })?;
        tracing::info!(bundle_id, "bundle cache miss, fetching from origin");
        let archive = origin.fetch(bundle_id).await?;

        let cache = self.clone();
        let id = bundle_id.to_string();
        tokio::task::spawn_blocking(move || cache.install(&id, &archive, expected.as_ref()))
            .await
            .map_err(|e| BundleError::storage("bundle install task failed", e))?
    }

    /// Verify and install an archive. Blocking.
    pub fn install(
        &self,
        bundle_id: &str,
        archive: &[u8],
        expected: Option<&ContentDigest>,
    ) -> Result<CachedBundle, BundleError> {
        ids::bundle(bundle_id)?;

        if let Some(expected) = expected {
            let computed = ContentDigest::of(archive);
            if !computed.matches(expected) {
                tracing::error!(
                    bundle_id,
                    expected = %expected.to_hex(),
                    computed = %computed.to_hex(),
                    "bundle digest mismatch"
                );
                return Err(BundleError::DigestMismatch {
                    bundle_id: bundle_id.to_string(),
                    expected: expected.to_hex(),
                    computed: computed.to_hex(),
                });
            }
        }

        fs_safe::ensure_dir(&self.root)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| BundleError::storage("cannot create staging directory", e))?;

        self.unpack(bundle_id, archive, staging.path())?;

        let bundle_root = Self::bundle_root(staging.path(), bundle_id)?;
        Self::validate_structure(&bundle_root, bundle_id)?;

        let dest = self.root.join(bundle_id);
        match fs::rename(&bundle_root, &dest) {
            Ok(()) => {
                tracing::info!(bundle_id, path = %dest.display(), "bundle installed");
                Ok(CachedBundle {
                    bundle_id: bundle_id.to_string(),
                    path: dest,
                    status: CacheStatus::Miss,
                })
            },
            Err(_) if dest.is_dir() => {
                tracing::info!(bundle_id, "concurrent install won, discarding staged copy");
                Ok(CachedBundle {
                    bundle_id: bundle_id.to_string(),
                    path: dest,
                    status: CacheStatus::Hit,
                })
            },
            Err(e) => Err(BundleError::storage(
                format_args!("cannot install bundle {bundle_id}"),
                e,
            )),
        }
    }

    /// Unpack entry by entry, enforcing the entry-count and declared-size
    /// bounds. The decompressed stream is capped too.
    fn unpack(&self, bundle_id: &str, archive: &[u8], dest: &Path) -> Result<(), BundleError> {
        let invalid = |detail: String| BundleError::StructureInvalid {
            bundle_id: bundle_id.to_string(),
            detail,
        };
        let overhead = u64::try_from(self.max_entries)
            .unwrap_or(u64::MAX)
            .saturating_add(1)
            .saturating_mul(ENTRY_OVERHEAD);
        let stream_limit = self.max_unpacked_size.saturating_add(overhead);
        let mut unpacker = tar::Archive::new(GzDecoder::new(archive).take(stream_limit));
        let entries = unpacker
            .entries()
            .map_err(|e| invalid(format!("archive unreadable: {e}")))?;

        let mut count = 0usize;
        let mut declared = 0u64;
        for entry in entries {
            let mut entry = entry.map_err(|e| invalid(format!("archive unreadable: {e}")))?;
            count += 1;
            if count > self.max_entries {
                return Err(invalid(format!("archive has more than {} entries", self.max_entries)));
            }
            declared = declared.saturating_add(entry.size());
            if declared > self.max_unpacked_size {
                return Err(invalid(format!(
                    "archive expands beyond {} bytes",
                    self.max_unpacked_size
                )));
            }
            entry
                .unpack_in(dest)
                .map_err(|e| invalid(format!("archive unreadable: {e}")))?;
        }
        Ok(())
    }

    /// The staging root itself, or its single top-level directory.
    fn bundle_root(staging: &Path, bundle_id: &str) -> Result<PathBuf, BundleError> {
        if staging.join(MANIFEST_FILE).is_file() {
            return Ok(staging.to_path_buf());
        }
        let entries: Vec<_> = fs::read_dir(staging)
            .map_err(|e| BundleError::storage("cannot list staging directory", e))?
            .collect::<Result<_, _>>()
            .map_err(|e| BundleError::storage("cannot list staging directory", e))?;
        match entries.as_slice() {
            [only] if only.path().is_dir() => Ok(only.path()),
            _ => Err(BundleError::StructureInvalid {
                bundle_id: bundle_id.to_string(),
                detail: "archive has no manifest at its root or in a single top-level directory"
                    .to_string(),
            }),
        }
    }

    fn validate_structure(root: &Path, bundle_id: &str) -> Result<(), BundleError> {
        let invalid = |detail: String| BundleError::StructureInvalid {
            bundle_id: bundle_id.to_string(),
            detail,
        };
        let manifest = BundleManifest::load(root).map_err(|e| invalid(e.to_string()))?;
        if manifest.bundle_id != bundle_id {
            return Err(invalid(format!(
                "manifest declares bundle {}",
                manifest.bundle_id
            )));
        }
        if !root.join(FAQ_DATA_FILE).is_file() {
            return Err(invalid(format!("{FAQ_DATA_FILE} missing")));
        }
        if !root.join(SUITES_DIR).is_dir() {
            return Err(invalid(format!("{SUITES_DIR}/ missing")));
        }
        Ok(())
    }
}
