//! Per-tenant rate limiting and quota.
//!
//! Two fixed-window buckets per tenant, `rate limit` then `quota`. Each
//! request increments the counter of the current window for the bucket; a
//! count above `max_requests` is rejected with a retryable
//! [`BundleError::RateLimited`]. The quota bucket is only charged when the
//! rate limit admitted the request.
//!
//! # Memory bound
//!
//! Counters are process-local. Every check sweeps keys of the same bucket
//! whose window started more than two windows ago, and the number of tracked
//! keys is capped by `max_tracked_keys`. A new key arriving at the cap is
//! rejected rather than evicting live counters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, QUOTA_BUCKET, RATE_LIMIT_BUCKET};

/// One fixed-window bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketPolicy {
    /// Window length in seconds (> 0).
    pub window_secs: u64,
    /// Requests admitted per window (> 0).
    pub max_requests: u32,
}

/// Both buckets for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantLimits {
    /// Short-window rate limit.
    pub rate_limit: BucketPolicy,
    /// Long-window quota.
    pub quota: BucketPolicy,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self {
            rate_limit: BucketPolicy {
                window_secs: 60,
                max_requests: 60,
            },
            quota: BucketPolicy {
                window_secs: 86_400,
                max_requests: 10_000,
            },
        }
    }
}

/// Limits for all tenants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Applied to tenants without an override.
    pub default: TenantLimits,
    /// Per-tenant overrides.
    pub tenants: HashMap<String, TenantLimits>,
    /// Hard cap on tracked counter keys.
    pub max_tracked_keys: usize,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            default: TenantLimits::default(),
            tenants: HashMap::new(),
            max_tracked_keys: 10_000,
        }
    }
}

impl LimitPolicy {
    fn for_tenant(&self, tenant_id: &str) -> TenantLimits {
        self.tenants.get(tenant_id).copied().unwrap_or(self.default)
    }
}

/// Admission decision for the rate limit bucket, reported to callers as
/// `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Bucket maximum.
    pub limit: u32,
    /// Requests left in the window.
    pub remaining: u32,
    /// Unix second at which the window resets.
    pub reset: u64,
}

/// Rate/quota limiting interface.
pub trait QuotaLimiter: Send + Sync {
    /// Charge one request to `tenant_id`.
    fn check(&self, tenant_id: &str) -> Result<RateDecision, BundleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    tenant_id: String,
    bucket: &'static str,
    window_start: u64,
}

struct Charge {
    decision: RateDecision,
    exceeded: bool,
    retry_after: u64,
}

/// In-process fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    policy: LimitPolicy,
    counters: Mutex<HashMap<WindowKey, u32>>,
}

impl FixedWindowLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(policy: LimitPolicy) -> Self {
        Self {
            policy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live counter keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// [`QuotaLimiter::check`] with an explicit clock (unix seconds).
    pub fn check_at(&self, tenant_id: &str, now: u64) -> Result<RateDecision, BundleError> {
        let limits = self.policy.for_tenant(tenant_id);
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let rate = self.charge(&mut counters, tenant_id, RATE_LIMIT_BUCKET, limits.rate_limit, now)?;
        if rate.exceeded {
            return Err(Self::rejected(tenant_id, RATE_LIMIT_BUCKET, &rate));
        }
        let quota = self.charge(&mut counters, tenant_id, QUOTA_BUCKET, limits.quota, now)?;
        if quota.exceeded {
            return Err(Self::rejected(tenant_id, QUOTA_BUCKET, &quota));
        }
        Ok(rate.decision)
    }

    fn rejected(tenant_id: &str, bucket: &'static str, charge: &Charge) -> BundleError {
        tracing::warn!(
            tenant_id,
            bucket,
            limit = charge.decision.limit,
            reset = charge.decision.reset,
            "request rejected"
        );
        BundleError::RateLimited {
            tenant_id: tenant_id.to_string(),
            bucket,
            limit: charge.decision.limit,
            reset: charge.decision.reset,
            retry_after_secs: charge.retry_after,
        }
    }

    fn charge(
        &self,
        counters: &mut HashMap<WindowKey, u32>,
        tenant_id: &str,
        bucket: &'static str,
        policy: BucketPolicy,
        now: u64,
    ) -> Result<Charge, BundleError> {
        let window = policy.window_secs.max(1);
        let window_start = now - now % window;
        let reset = window_start + window;

        let gc_before = now.saturating_sub(window * 2);
        counters.retain(|key, _| key.bucket != bucket || key.window_start >= gc_before);

        let key = WindowKey {
            tenant_id: tenant_id.to_string(),
            bucket,
            window_start,
        };
        if !counters.contains_key(&key) && counters.len() >= self.policy.max_tracked_keys {
            tracing::warn!(
                tracked_keys = counters.len(),
                max_tracked_keys = self.policy.max_tracked_keys,
                "rejecting new tenant window: tracked key limit reached"
            );
            return Err(BundleError::RateLimited {
                tenant_id: tenant_id.to_string(),
                bucket,
                limit: policy.max_requests,
                reset,
                retry_after_secs: reset.saturating_sub(now).max(1),
            });
        }

        let count = counters.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        Ok(Charge {
            decision: RateDecision {
                limit: policy.max_requests,
                remaining: policy.max_requests.saturating_sub(*count),
                reset,
            },
            exceeded: *count > policy.max_requests,
            retry_after: reset.saturating_sub(now).max(1),
        })
    }
}

impl QuotaLimiter for FixedWindowLimiter {
    fn check(&self, tenant_id: &str) -> Result<RateDecision, BundleError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.check_at(tenant_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rate: u32, quota: u32) -> LimitPolicy {
        LimitPolicy {
            default: TenantLimits {
                rate_limit: BucketPolicy {
                    window_secs: 10,
                    max_requests: rate,
                },
                quota: BucketPolicy {
                    window_secs: 100,
                    max_requests: quota,
                },
            },
            tenants: HashMap::new(),
            max_tracked_keys: 100,
        }
    }

    #[test]
    fn test_rate_limit_window() {
        let limiter = FixedWindowLimiter::new(policy(2, 100));
        let d = limiter.check_at("t", 1_000).unwrap();
        assert_eq!((d.limit, d.remaining, d.reset), (2, 1, 1_010));
        assert_eq!(limiter.check_at("t", 1_001).unwrap().remaining, 0);

        match limiter.check_at("t", 1_004) {
            Err(BundleError::RateLimited {
                bucket,
                retry_after_secs,
                reset,
                ..
            }) => {
                assert_eq!(bucket, RATE_LIMIT_BUCKET);
                assert_eq!(reset, 1_010);
                assert_eq!(retry_after_secs, 6);
            },
            other => panic!("expected rate limit, got {other:?}"),
        }
        // Next window admits again; other tenants are unaffected.
        assert!(limiter.check_at("t", 1_010).is_ok());
        assert!(limiter.check_at("other", 1_004).is_ok());
    }

    #[test]
    fn test_quota_exhaustion() {
        let limiter = FixedWindowLimiter::new(policy(100, 2));
        limiter.check_at("t", 1_000).unwrap();
        limiter.check_at("t", 1_000).unwrap();
        assert!(matches!(
            limiter.check_at("t", 1_050),
            Err(BundleError::RateLimited {
                bucket: QUOTA_BUCKET,
                ..
            })
        ));
    }

    #[test]
    fn test_tenant_override() {
        let mut p = policy(1, 100);
        p.tenants.insert("vip".into(), policy(5, 100).default);
        let limiter = FixedWindowLimiter::new(p);
        for _ in 0..5 {
            limiter.check_at("vip", 1_000).unwrap();
        }
        limiter.check_at("t", 1_000).unwrap();
        assert!(limiter.check_at("t", 1_000).is_err());
    }

    #[test]
    fn test_old_windows_are_swept() {
        let limiter = FixedWindowLimiter::new(policy(100, 100));
        for i in 0..10 {
            limiter.check_at(&format!("t{i}"), 1_000).unwrap();
        }
        assert_eq!(limiter.tracked_keys(), 20);
        // Rate windows from t=1000 are older than 2x10s at t=1030; quota
        // windows (100s) survive.
        limiter.check_at("late", 1_030).unwrap();
        assert_eq!(limiter.tracked_keys(), 12);
    }

    #[test]
    fn test_tracked_key_cap() {
        let mut p = policy(100, 100);
        p.max_tracked_keys = 4;
        let limiter = FixedWindowLimiter::new(p);
        limiter.check_at("a", 1_000).unwrap();
        limiter.check_at("b", 1_000).unwrap();
        assert!(limiter.check_at("c", 1_000).is_err());
        assert!(limiter.check_at("a", 1_001).is_ok());
    }
}
