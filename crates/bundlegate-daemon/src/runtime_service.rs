//! Tenant-facing runtime API.
//!
//! `POST /execute` answers one question from the tenant's current bundle:
//!
//! 1. authenticate `X-Tenant-Id` + `X-Api-Key`
//! 2. charge the rate limit and quota buckets
//! 3. resolve the current bundle (control plane, else static catalog) and
//!    make sure it is in the local cache
//! 4. look the question up in the bundle's FAQ data
//!
//! Every call emits exactly one `execute` audit event. The question text is
//! never logged; the event carries its length and SHA-256.

use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bundlegate_core::BundleError;
use bundlegate_core::audit::{Actor, AuditSink, text_sha256};
use bundlegate_core::auth::{StaticTokenAuthenticator, TenantAuthenticator};
use bundlegate_core::bundle::AliasCatalog;
use bundlegate_core::cache::BundleCache;
use bundlegate_core::config::BundlegateConfig;
use bundlegate_core::limits::{FixedWindowLimiter, QuotaLimiter, RateDecision};
use bundlegate_core::runtime::RuntimeBundleResolver;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api_error::insert_rate_headers;
use crate::audit_scope::AuditScope;
use crate::faq::{AnswerStatus, FaqIndex};
use crate::http_client::{HttpControlPlaneClient, HttpOrigin};
use crate::{blocking, request, secret_from_env};

/// `service` field of runtime audit events.
pub const SERVICE: &str = "runtime";

/// Resolver wired to the HTTP control plane and origin.
pub type HttpBundleResolver = RuntimeBundleResolver<HttpControlPlaneClient, HttpOrigin>;

/// Body of `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Question to answer.
    pub question: String,
}

/// Successful `/execute` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Request id, echoed or generated.
    pub request_id: String,
    /// Bundle that answered.
    pub bundle_id: String,
    /// Authenticated tenant.
    pub tenant_id: String,
    /// Match status.
    pub status: AnswerStatus,
    /// Answer text, empty on `no_match`.
    pub answer: String,
}

struct Inner {
    resolver: HttpBundleResolver,
    authenticator: Arc<dyn TenantAuthenticator>,
    limiter: Arc<dyn QuotaLimiter>,
    audit: Arc<dyn AuditSink>,
}

/// Shared state of the runtime router.
#[derive(Clone)]
pub struct RuntimeState {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("resolver", &self.inner.resolver)
            .finish_non_exhaustive()
    }
}

impl RuntimeState {
    /// Assemble state from its parts.
    #[must_use]
    pub fn new(
        resolver: HttpBundleResolver,
        authenticator: Arc<dyn TenantAuthenticator>,
        limiter: Arc<dyn QuotaLimiter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                authenticator,
                limiter,
                audit,
            }),
        }
    }

    /// Build state from `[runtime]` and `[limits]`.
    pub fn from_config(
        config: &BundlegateConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, BundleError> {
        let runtime = &config.runtime;
        let version = runtime.version().map_err(|e| BundleError::Config {
            detail: e.to_string(),
        })?;
        let catalog = Arc::new(AliasCatalog::load(
            &runtime.catalog_path,
            runtime.catalog_path.parent().unwrap_or_else(|| Path::new(".")),
        )?);

        let mut resolver = HttpBundleResolver::new(BundleCache::new(&runtime.cache_dir), catalog, version)
            .require_digest(runtime.require_digest);
        if let Some(url) = &runtime.control_plane_url {
            let token = runtime
                .control_plane_token_env
                .as_deref()
                .map(secret_from_env)
                .transpose()?;
            resolver = resolver.with_control_plane(HttpControlPlaneClient::new(
                url,
                token,
                runtime.control_plane_timeout(),
            ));
        } else {
            tracing::warn!("no control plane configured, resolving from the static catalog");
        }
        if let Some(url) = &runtime.origin_url {
            resolver = resolver.with_origin(HttpOrigin::new(url, runtime.origin_timeout()));
        }

        let authenticator = Arc::new(StaticTokenAuthenticator::load(&runtime.tokens_path)?);
        let limiter = Arc::new(FixedWindowLimiter::new(config.limits.to_policy()));

        tracing::info!(
            runtime_version = %version,
            cache_dir = %runtime.cache_dir.display(),
            control_plane = runtime.control_plane_url.as_deref().unwrap_or("-"),
            origin = runtime.origin_url.as_deref().unwrap_or("-"),
            require_digest = runtime.require_digest,
            "runtime state initialized"
        );
        Ok(Self::new(resolver, authenticator, limiter, audit))
    }
}

/// Runtime router.
pub fn router(state: RuntimeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/execute", post(execute))
        .with_state(state)
}

async fn healthz(State(state): State<RuntimeState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "runtime_version": state.inner.resolver.runtime_version().to_string(),
    }))
}

fn rate_detail(decision: &RateDecision) -> serde_json::Value {
    json!({
        "limit": decision.limit,
        "remaining": decision.remaining,
        "reset": decision.reset,
    })
}

async fn execute(State(state): State<RuntimeState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request::request_id(&headers);
    let mut scope = AuditScope::begin(
        state.inner.audit.clone(),
        SERVICE,
        "execute",
        &request_id,
        Actor::ExternalClient,
    );
    let mut admitted: Option<RateDecision> = None;

    let result: Result<_, BundleError> = async {
        let auth = state
            .inner
            .authenticator
            .authenticate(&request::api_key_credentials(&headers))?;
        let tenant_id = auth.tenant_id().to_string();
        scope.set_tenant(&tenant_id);

        let decision = state.inner.limiter.check(&tenant_id)?;
        scope.detail("rate_limit", rate_detail(&decision));
        admitted = Some(decision);

        let ExecuteRequest { question } =
            serde_json::from_slice(&body).map_err(|e| BundleError::InvalidRequest {
                detail: e.to_string(),
            })?;
        scope.detail("question_len", question.chars().count());
        scope.detail("question_sha256", text_sha256(&question));

        let resolved = match state
            .inner
            .resolver
            .resolve_and_ensure(&tenant_id, &request_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                if let BundleError::ControlPlaneUnavailable {
                    status: Some(status),
                    ..
                } = &e
                {
                    scope.detail("control_plane_status", *status);
                }
                return Err(e);
            },
        };
        scope.set_bundle(&resolved.bundle_id);
        if let Some(status) = resolved.control_plane_status {
            scope.detail("control_plane_status", status);
        }
        if let Some(cache) = resolved.cache_status {
            scope.detail(
                "bundle_cache",
                json!({"status": cache.as_str(), "bundle_id": resolved.bundle_id}),
            );
        }

        let bundle_dir = resolved.path.clone();
        let index = blocking(move || FaqIndex::load(&bundle_dir)).await?;
        let answer = index.answer(&question);
        Ok(ExecuteResponse {
            request_id: request_id.clone(),
            bundle_id: resolved.bundle_id,
            tenant_id,
            status: answer.status,
            answer: answer.answer,
        })
    }
    .await;

    let mut response = scope.finish(result).map(Json).into_response();
    if response.status().is_success() {
        if let Some(decision) = &admitted {
            insert_rate_headers(response.headers_mut(), decision);
        }
    }
    response
}
