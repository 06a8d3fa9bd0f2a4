//! HTTP client for the control-plane API.
//!
//! Every request is scoped to one tenant: it carries `X-Tenant-Id` and the
//! operator's bearer token, and paths are relative to `/tenants/{tenant}`.

use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

/// Default bound on one request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

const AGENT: &str = concat!("bundlegate-cli/", env!("CARGO_PKG_VERSION"));

/// Control-plane request failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    /// Connection or body transfer failed.
    #[error("cannot reach control plane at {url}: {detail}")]
    Transport {
        /// Target URL.
        url: String,
        /// Failure description.
        detail: String,
    },

    /// No answer within the timeout.
    #[error("control plane did not answer within {0:?}")]
    Timeout(Duration),

    /// Non-2xx answer.
    #[error("control plane returned {status}")]
    Api {
        /// Response status.
        status: StatusCode,
        /// Response body as text.
        body: String,
    },

    /// 2xx answer that is not JSON.
    #[error("response is not JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Tenant-scoped control-plane client.
pub struct ControlPlaneClient {
    base_url: String,
    tenant_id: String,
    token: SecretString,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ControlPlaneClient {
    /// Client for `tenant_id` on the control plane at `base_url`.
    pub fn new(base_url: &str, tenant_id: String, token: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant_id,
            token,
            timeout: DEFAULT_TIMEOUT,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `GET /tenants/{tenant}{path}`.
    pub async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.send(Method::GET, path, None).await
    }

    /// `POST /tenants/{tenant}{path}` with an optional JSON body.
    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, ClientError> {
        self.send(Method::POST, path, body).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ClientError> {
        let url = format!("{}/tenants/{}{path}", self.base_url, self.tenant_id);
        let transport = |detail: String| ClientError::Transport {
            url: url.clone(),
            detail,
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&url)
            .header(USER_AGENT, AGENT)
            .header("x-tenant-id", &self.tenant_id)
            .header(AUTHORIZATION, format!("Bearer {}", self.token.expose_secret()));
        let payload = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(body)?)
            },
            None => Bytes::new(),
        };
        let request = builder.body(Full::new(payload))?;

        tracing::debug!(%method, url = %url, "sending control plane request");
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| transport(e.to_string()))?;
            let status = response.status();
            let bytes = Limited::new(response.into_body(), MAX_RESPONSE_SIZE)
                .collect()
                .await
                .map_err(|e| transport(format!("cannot read response body: {e}")))?
                .to_bytes();
            Ok::<_, ClientError>((status, bytes))
        };
        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        tracing::debug!(status = status.as_u16(), bytes = bytes.len(), "control plane answered");
        if !status.is_success() {
            return Err(ClientError::Api {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
