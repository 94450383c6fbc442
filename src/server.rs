use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{IdentityVerifier, JwtError};
use crate::config::{AppConfig, SecurityConfig};
use crate::handlers;
use crate::middleware::{validate_tenant_middleware, AuthPipeline, RouteGuard};
use crate::realtime::RealtimeHub;
use crate::tenant::{OperationSpec, TenantScopeEnforcer, TENANT_HINT_HEADER};

// Operation table: the tenant capability marker for each guarded route
pub static WHOAMI: OperationSpec = OperationSpec::tenant_exempt("auth.whoami");
pub static TENANT_CONTEXT: OperationSpec = OperationSpec::tenant_scoped("tenant.context");
pub static REALTIME_PUBLISH: OperationSpec = OperationSpec::tenant_scoped("realtime.publish");
pub static REALTIME_CONNECT: OperationSpec = OperationSpec::tenant_scoped("realtime.connect");

#[derive(Clone)]
pub struct AppState {
    pub pipeline: AuthPipeline,
    pub hub: RealtimeHub,
    pub default_namespace: Option<String>,
    pub channel_capacity: usize,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self, JwtError> {
        let verifier = IdentityVerifier::from_secret(&config.security.jwt_secret)?;
        let enforcer = TenantScopeEnforcer::new(config.security.enable_audit_logging);

        Ok(Self {
            pipeline: AuthPipeline::new(verifier, enforcer),
            hub: RealtimeHub::new(config.realtime.channel_capacity),
            default_namespace: config.realtime.channel_namespace.clone(),
            channel_capacity: config.realtime.channel_capacity,
        })
    }

    pub fn namespace_or_default(&self, requested: Option<String>) -> Option<String> {
        requested
            .filter(|ns| !ns.trim().is_empty())
            .or_else(|| self.default_namespace.clone())
    }
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    let cors = cors_layer(&config.security);

    let router = Router::new()
        // Public
        .route("/health", get(handlers::health_get))
        // Realtime handshake authenticates itself from query params
        .route("/realtime", get(handlers::realtime_ws))
        .merge(guarded_routes(&state))
        .layer(cors);

    let router = if config.api.enable_request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router.with_state(state)
}

fn guarded_routes(state: &AppState) -> Router<AppState> {
    let pipeline = &state.pipeline;

    Router::new()
        .route(
            "/api/auth/whoami",
            get(handlers::whoami_get).route_layer(from_fn_with_state(
                RouteGuard::new(pipeline, &WHOAMI),
                validate_tenant_middleware,
            )),
        )
        .route(
            "/api/tenant/context",
            get(handlers::context_get).route_layer(from_fn_with_state(
                RouteGuard::new(pipeline, &TENANT_CONTEXT),
                validate_tenant_middleware,
            )),
        )
        .route(
            "/api/realtime/:channel",
            post(handlers::publish_post).route_layer(from_fn_with_state(
                RouteGuard::new(pipeline, &REALTIME_PUBLISH),
                validate_tenant_middleware,
            )),
        )
}

/// Browser access is limited to the configured origins; `*` allows any.
fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }

    let allow_origin = if security.cors_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = security
            .cors_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(TENANT_HINT_HEADER),
        ])
}
