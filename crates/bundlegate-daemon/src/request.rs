//! Request header helpers shared by both services.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use bundlegate_core::auth::Credentials;

/// `X-Tenant-Id`.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// `X-Api-Key`, the runtime's tenant credential.
pub const API_KEY_HEADER: &str = "x-api-key";
/// `X-Request-Id`.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Caller-supplied request id, or a fresh UUID.
#[must_use]
pub fn request_id(headers: &HeaderMap) -> String {
    header(headers, REQUEST_ID_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

/// Token from `Authorization: Bearer <token>`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = header(headers, AUTHORIZATION.as_str())?.trim();
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Control-plane credentials: `X-Tenant-Id` plus bearer token.
#[must_use]
pub fn bearer_credentials(headers: &HeaderMap) -> Credentials {
    Credentials::from_headers(header(headers, TENANT_HEADER), bearer_token(headers))
}

/// Runtime credentials: `X-Tenant-Id` plus `X-Api-Key`.
#[must_use]
pub fn api_key_credentials(headers: &HeaderMap) -> Credentials {
    Credentials::from_headers(header(headers, TENANT_HEADER), header(headers, API_KEY_HEADER))
}
