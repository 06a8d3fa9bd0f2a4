//! Control-plane HTTP API.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET  | `/healthz` | liveness |
//! | GET  | `/tenants/{t}/resolve/current` | current bundle for a runtime |
//! | GET  | `/tenants/{t}/aliases` | alias state |
//! | POST | `/tenants/{t}/aliases/candidate` | set candidate |
//! | POST | `/tenants/{t}/aliases/promote` | promote candidate |
//! | POST | `/tenants/{t}/aliases/rollback` | point current at a gated bundle |
//! | POST | `/tenants/{t}/bundles/{b}/gates` | run a gate |
//! | GET  | `/tenants/{t}/bundles/{b}/gates/history` | recent gate runs |
//! | GET  | `/tenants/{t}/bundles/{b}/gates/{gate_id}` | one gate run |
//!
//! Tenant routes authenticate with `Authorization: Bearer <token>` plus
//! `X-Tenant-Id`, and the authenticated tenant must match the path. The
//! resolve route also accepts the runtime's service token, which may resolve
//! any tenant.

use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use bundlegate_core::BundleError;
use bundlegate_core::alias::{AliasDocument, AliasLifecycleManager, AliasStateStore};
use bundlegate_core::audit::{Actor, AuditSink};
use bundlegate_core::auth::{
    AuthenticatedTenant, StaticTokenAuthenticator, TenantAuthenticator, require_tenant,
    token_matches,
};
use bundlegate_core::bundle::{AliasCatalog, BundleLocator, FsBundleLocator};
use bundlegate_core::config::ControlPlaneConfig;
use bundlegate_core::gate::{GATE_HISTORY_LIMIT, GateResult, GateResultStore, QualityGateEngine};
use bundlegate_core::resolution::{ResolutionResponse, ResolutionService};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api_error::ApiError;
use crate::audit_scope::AuditScope;
use crate::faq::FaqExecutor;
use crate::{blocking, request, secret_from_env};

/// `service` field of control-plane audit events.
pub const SERVICE: &str = "control_plane";

/// Body of candidate and rollback requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRequest {
    /// Target bundle.
    pub bundle_id: String,
}

/// Body of a gate run request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateRunRequest {
    /// Run only this suite.
    #[serde(default)]
    pub suite_id: Option<String>,
}

/// Gate history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateHistory {
    /// Maximum number of items returned.
    pub limit: usize,
    /// Runs, newest first.
    pub items: Vec<GateResult>,
}

struct Inner {
    lifecycle: AliasLifecycleManager,
    engine: QualityGateEngine,
    resolution: ResolutionService,
    authenticator: Arc<dyn TenantAuthenticator>,
    service_token: Option<SecretString>,
    audit: Arc<dyn AuditSink>,
}

/// Shared state of the control-plane router.
#[derive(Clone)]
pub struct ControlPlaneState {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ControlPlaneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneState")
            .field("lifecycle", &self.inner.lifecycle)
            .field("service_token", &self.inner.service_token.is_some())
            .finish_non_exhaustive()
    }
}

impl ControlPlaneState {
    /// Assemble state from its parts.
    #[must_use]
    pub fn new(
        lifecycle: AliasLifecycleManager,
        engine: QualityGateEngine,
        resolution: ResolutionService,
        authenticator: Arc<dyn TenantAuthenticator>,
        service_token: Option<SecretString>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lifecycle,
                engine,
                resolution,
                authenticator,
                service_token,
                audit,
            }),
        }
    }

    /// Build state from `[control_plane]`, running gates in-process.
    ///
    /// Fails closed: a missing tokens file or an unset service token
    /// variable is a configuration error.
    pub fn from_config(
        config: &ControlPlaneConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, BundleError> {
        let catalog = Arc::new(AliasCatalog::load(
            &config.catalog_path,
            config.catalog_path.parent().unwrap_or_else(|| Path::new(".")),
        )?);
        let locator: Arc<dyn BundleLocator> = Arc::new(FsBundleLocator::new(
            config.bundle_roots.clone(),
            catalog.clone(),
        ));
        let aliases = AliasStateStore::new(&config.alias_state_root);
        let gates = GateResultStore::new(&config.gate_root);
        let authenticator = Arc::new(StaticTokenAuthenticator::load(&config.tokens_path)?);
        let service_token = config
            .service_token_env
            .as_deref()
            .map(secret_from_env)
            .transpose()?;

        tracing::info!(
            alias_state_root = %config.alias_state_root.display(),
            gate_root = %config.gate_root.display(),
            bundle_roots = config.bundle_roots.len(),
            catalog_empty = catalog.is_empty(),
            service_token = service_token.is_some(),
            "control plane state initialized"
        );

        Ok(Self::new(
            AliasLifecycleManager::new(aliases.clone(), gates.clone(), locator.clone()),
            QualityGateEngine::new(locator.clone(), gates, Arc::new(FaqExecutor)),
            ResolutionService::new(aliases, catalog, locator),
            authenticator,
            service_token,
            audit,
        ))
    }

    fn authenticate(&self, headers: &HeaderMap, tenant_id: &str) -> Result<AuthenticatedTenant, BundleError> {
        let auth = self
            .inner
            .authenticator
            .authenticate(&request::bearer_credentials(headers))?;
        require_tenant(&auth, tenant_id)?;
        Ok(auth)
    }

    fn is_service(&self, headers: &HeaderMap) -> bool {
        match (&self.inner.service_token, request::bearer_token(headers)) {
            (Some(expected), Some(presented)) => {
                token_matches(&SecretString::from(presented.to_string()), expected)
            },
            _ => false,
        }
    }

    fn scope(&self, event: &'static str, request_id: &str) -> AuditScope {
        AuditScope::begin(self.inner.audit.clone(), SERVICE, event, request_id, Actor::Operator)
    }
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, BundleError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_required(body)
}

fn parse_required<T: DeserializeOwned>(body: &[u8]) -> Result<T, BundleError> {
    serde_json::from_slice(body).map_err(|e| BundleError::InvalidRequest {
        detail: e.to_string(),
    })
}

/// Control-plane router.
pub fn router(state: ControlPlaneState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tenants/{tenant_id}/resolve/current", get(resolve_current))
        .route("/tenants/{tenant_id}/aliases", get(aliases))
        .route("/tenants/{tenant_id}/aliases/candidate", post(set_candidate))
        .route("/tenants/{tenant_id}/aliases/promote", post(promote))
        .route("/tenants/{tenant_id}/aliases/rollback", post(rollback))
        .route("/tenants/{tenant_id}/bundles/{bundle_id}/gates", post(run_gate))
        .route(
            "/tenants/{tenant_id}/bundles/{bundle_id}/gates/history",
            get(gate_history),
        )
        .route(
            "/tenants/{tenant_id}/bundles/{bundle_id}/gates/{gate_id}",
            get(get_gate),
        )
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn resolve_current(
    State(state): State<ControlPlaneState>,
    UrlPath(tenant_id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<ResolutionResponse>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("resolve_current", &request_id);
    let result: Result<_, BundleError> = async {
        if state.is_service(&headers) {
            scope.set_actor(Actor::Service);
        } else {
            state.authenticate(&headers, &tenant_id)?;
        }
        scope.set_tenant(&tenant_id);
        let service = state.inner.resolution.clone();
        let tenant = tenant_id.clone();
        let resolution = blocking(move || service.resolve_current(&tenant)).await?;
        scope.set_bundle(&resolution.bundle_id);
        Ok(resolution)
    }
    .await;
    scope.finish(result).map(Json)
}

async fn aliases(
    State(state): State<ControlPlaneState>,
    UrlPath(tenant_id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<AliasDocument>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("get_aliases", &request_id);
    let result: Result<_, BundleError> = async {
        let auth = state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let lifecycle = state.inner.lifecycle.clone();
        let tenant = tenant_id.clone();
        let aliases = blocking(move || lifecycle.aliases(&auth, &tenant)).await?;
        Ok(AliasDocument { tenant_id, aliases })
    }
    .await;
    scope.finish(result).map(Json)
}

async fn set_candidate(
    State(state): State<ControlPlaneState>,
    UrlPath(tenant_id): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AliasDocument>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("set_candidate", &request_id);
    let result: Result<_, BundleError> = async {
        let auth = state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let BundleRequest { bundle_id } = parse_required(&body)?;
        scope.set_bundle(&bundle_id);
        let lifecycle = state.inner.lifecycle.clone();
        let tenant = tenant_id.clone();
        let aliases =
            blocking(move || lifecycle.set_candidate(&auth, &tenant, &bundle_id)).await?;
        Ok(AliasDocument { tenant_id, aliases })
    }
    .await;
    scope.finish(result).map(Json)
}

async fn promote(
    State(state): State<ControlPlaneState>,
    UrlPath(tenant_id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<AliasDocument>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("promote", &request_id);
    let result: Result<_, BundleError> = async {
        let auth = state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let lifecycle = state.inner.lifecycle.clone();
        let tenant = tenant_id.clone();
        let aliases = blocking(move || lifecycle.promote(&auth, &tenant)).await?;
        if let Some(current) = &aliases.current {
            scope.set_bundle(&current.bundle_id);
        }
        Ok(AliasDocument { tenant_id, aliases })
    }
    .await;
    scope.finish(result).map(Json)
}

async fn rollback(
    State(state): State<ControlPlaneState>,
    UrlPath(tenant_id): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AliasDocument>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("rollback", &request_id);
    let result: Result<_, BundleError> = async {
        let auth = state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let BundleRequest { bundle_id } = parse_required(&body)?;
        scope.set_bundle(&bundle_id);
        let lifecycle = state.inner.lifecycle.clone();
        let tenant = tenant_id.clone();
        let aliases = blocking(move || lifecycle.rollback(&auth, &tenant, &bundle_id)).await?;
        Ok(AliasDocument { tenant_id, aliases })
    }
    .await;
    scope.finish(result).map(Json)
}

async fn run_gate(
    State(state): State<ControlPlaneState>,
    UrlPath((tenant_id, bundle_id)): UrlPath<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GateResult>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("gate_run", &request_id);
    scope.set_bundle(&bundle_id);
    let result: Result<_, BundleError> = async {
        let auth = state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let GateRunRequest { suite_id } = parse_body(&body)?;
        if let Some(suite_id) = &suite_id {
            scope.detail("suite_id", suite_id.as_str());
        }
        let engine = state.inner.engine.clone();
        let request = request_id.clone();
        let outcome = blocking(move || {
            engine.run_gate(&auth, &tenant_id, &bundle_id, suite_id.as_deref(), &request)
        })
        .await;
        match &outcome {
            Ok(gate) => {
                scope.set_gate(&gate.gate_id);
                scope.detail("gate_outcome", serde_json::to_value(gate.outcome).unwrap_or_default());
                scope.detail("total", gate.summary.total);
                scope.detail("passed", gate.summary.passed);
                scope.detail("failed", gate.summary.failed);
            },
            Err(BundleError::RuntimeFault { gate_id, .. }) => scope.set_gate(gate_id),
            Err(_) => {},
        }
        outcome
    }
    .await;
    scope.finish(result).map(Json)
}

async fn gate_history(
    State(state): State<ControlPlaneState>,
    UrlPath((tenant_id, bundle_id)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<GateHistory>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("gate_history", &request_id);
    scope.set_bundle(&bundle_id);
    let result: Result<_, BundleError> = async {
        state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let store = state.inner.engine.store().clone();
        let items = blocking(move || store.history(&tenant_id, &bundle_id)).await?;
        Ok(GateHistory {
            limit: GATE_HISTORY_LIMIT,
            items,
        })
    }
    .await;
    scope.finish(result).map(Json)
}

async fn get_gate(
    State(state): State<ControlPlaneState>,
    UrlPath((tenant_id, bundle_id, gate_id)): UrlPath<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<GateResult>, ApiError> {
    let request_id = request::request_id(&headers);
    let mut scope = state.scope("gate_get", &request_id);
    scope.set_bundle(&bundle_id);
    scope.set_gate(&gate_id);
    let result: Result<_, BundleError> = async {
        state.authenticate(&headers, &tenant_id)?;
        scope.set_tenant(&tenant_id);
        let store = state.inner.engine.store().clone();
        blocking(move || store.get(&tenant_id, &bundle_id, &gate_id)).await
    }
    .await;
    scope.finish(result).map(Json)
}
