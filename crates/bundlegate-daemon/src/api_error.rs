//! HTTP rendering of [`BundleError`].
//!
//! Every failure leaves the process as `{"error": <code>, "detail": <msg>}`
//! with the status of its [`ErrorClass`]. The detail is
//! [`BundleError::public_message`]; paths and IO errors only reach the log.

use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bundlegate_core::limits::RateDecision;
use bundlegate_core::{BundleError, ErrorClass};
use serde::{Deserialize, Serialize};

/// `X-RateLimit-Limit`.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining`.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// `X-RateLimit-Reset`.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error class code.
    pub error: String,
    /// Caller-safe message.
    pub detail: String,
}

/// A [`BundleError`] on its way to an HTTP client.
#[derive(Debug)]
pub struct ApiError(pub BundleError);

impl ApiError {
    /// Class of the wrapped error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.0.class()
    }
}

impl From<BundleError> for ApiError {
    fn from(err: BundleError) -> Self {
        Self(err)
    }
}

/// Insert `X-RateLimit-*` headers for `decision`.
pub fn insert_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    for (name, value) in [
        (RATE_LIMIT_LIMIT, u64::from(decision.limit)),
        (RATE_LIMIT_REMAINING, u64::from(decision.remaining)),
        (RATE_LIMIT_RESET, decision.reset),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.class();
        let status =
            StatusCode::from_u16(class.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if class == ErrorClass::Internal {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, code = class.code(), "request rejected");
        }

        let body = ErrorBody {
            error: class.code().to_string(),
            detail: self.0.public_message(),
        };
        let mut response = (status, Json(body)).into_response();

        if let BundleError::RateLimited {
            limit,
            reset,
            retry_after_secs,
            ..
        } = &self.0
        {
            let headers = response.headers_mut();
            insert_rate_headers(
                headers,
                &RateDecision {
                    limit: *limit,
                    remaining: 0,
                    reset: *reset,
                },
            );
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(*retry_after_secs),
            );
        }
        response
    }
}
