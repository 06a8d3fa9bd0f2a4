//! Outbound HTTP: the runtime's control-plane client and bundle origin.
//!
//! Both use a plain-HTTP hyper client. Every call is wrapped in
//! `tokio::time::timeout`; expiry, transport errors and oversized bodies all
//! surface as the retryable `Unavailable` class.

use std::time::Duration;

use bundlegate_core::BundleError;
use bundlegate_core::cache::BundleOrigin;
use bundlegate_core::runtime::{ControlPlaneClient, ControlPlaneReply};
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use secrecy::{ExposeSecret, SecretString};

use crate::request::{REQUEST_ID_HEADER, TENANT_HEADER};

/// Upper bound on a resolution response body.
const MAX_RESOLUTION_BODY: usize = 64 * 1024;

/// Upper bound on a bundle archive.
pub const MAX_ARCHIVE_SIZE: usize = 256 * 1024 * 1024;

const USER_AGENT: &str = concat!("bundlegate/", env!("CARGO_PKG_VERSION"));

type HttpClient = Client<HttpConnector, Full<Bytes>>;

fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Status and size-capped body of one GET.
async fn get(
    client: &HttpClient,
    request: Request<Full<Bytes>>,
    timeout: Duration,
    max_body: usize,
) -> Result<(StatusCode, Bytes), String> {
    let exchange = async {
        let response: hyper::Response<hyper::body::Incoming> =
            client.request(request).await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = Limited::new(response.into_body(), max_body)
            .collect()
            .await
            .map_err(|e| format!("cannot read response body: {e}"))?
            .to_bytes();
        Ok::<_, String>((status, body))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| format!("timed out after {}ms", timeout.as_millis()))?
}

/// [`ControlPlaneClient`] over `GET <base>/tenants/{t}/resolve/current`.
#[derive(Clone)]
pub struct HttpControlPlaneClient {
    base_url: String,
    token: Option<std::sync::Arc<SecretString>>,
    timeout: Duration,
    client: HttpClient,
}

impl std::fmt::Debug for HttpControlPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpControlPlaneClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpControlPlaneClient {
    /// Client for `base_url`, authenticating with `token` when given.
    #[must_use]
    pub fn new(base_url: &str, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(std::sync::Arc::new),
            timeout,
            client: http_client(),
        }
    }
}

impl ControlPlaneClient for HttpControlPlaneClient {
    async fn resolve_current(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> Result<ControlPlaneReply, BundleError> {
        let url = format!("{}/tenants/{tenant_id}/resolve/current", self.base_url);
        let unreachable = |detail: String| BundleError::ControlPlaneUnavailable {
            detail,
            status: None,
        };

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header(http::header::USER_AGENT, USER_AGENT)
            .header(TENANT_HEADER, tenant_id)
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(token) = &self.token {
            builder = builder.header(
                http::header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }
        let request = builder
            .body(Full::new(Bytes::new()))
            .map_err(|e| unreachable(format!("cannot build request: {e}")))?;

        tracing::debug!(url = %url, request_id, "resolving via control plane");
        let (status, body) = get(&self.client, request, self.timeout, MAX_RESOLUTION_BODY)
            .await
            .map_err(|detail| {
                tracing::warn!(url = %url, detail = %detail, "control plane unreachable");
                unreachable(detail)
            })?;
        Ok(ControlPlaneReply {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

/// [`BundleOrigin`] serving `<base>/<bundle_id>.tar.gz`.
#[derive(Clone)]
pub struct HttpOrigin {
    base_url: String,
    timeout: Duration,
    client: HttpClient,
}

impl std::fmt::Debug for HttpOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOrigin")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpOrigin {
    /// Origin rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: http_client(),
        }
    }
}

impl BundleOrigin for HttpOrigin {
    async fn fetch(&self, bundle_id: &str) -> Result<Vec<u8>, BundleError> {
        let url = format!("{}/{bundle_id}.tar.gz", self.base_url);
        let unavailable = |detail: String| BundleError::OriginUnavailable {
            bundle_id: bundle_id.to_string(),
            detail,
        };
        let request = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header(http::header::USER_AGENT, USER_AGENT)
            .body(Full::new(Bytes::new()))
            .map_err(|e| unavailable(format!("cannot build request: {e}")))?;

        let (status, body) = get(&self.client, request, self.timeout, MAX_ARCHIVE_SIZE)
            .await
            .map_err(&unavailable)?;
        if !status.is_success() {
            tracing::warn!(bundle_id, url = %url, status = status.as_u16(), "origin refused bundle");
            return Err(unavailable(format!("origin returned {status}")));
        }
        tracing::info!(bundle_id, bytes = body.len(), "bundle archive fetched");
        Ok(body.to_vec())
    }
}
