pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::ip_rate_limit_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::services::{
    AttemptService, GrantService, IdentityService, IdentityStore, OrgGraphValidator,
    OrganizationService, SessionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn IdentityStore>,
    pub attempts: Arc<AttemptService>,
    pub sessions: Arc<SessionManager>,
    pub grants: GrantService,
    pub graph: OrgGraphValidator,
    pub identity: IdentityService,
    pub organizations: OrganizationService,
    pub login_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub register_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub ip_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    // Login and registration carry their own, tighter rate limits.
    let login_limiter = state.login_rate_limiter.clone();
    let login_route = Router::new()
        .route("/login", post(handlers::login::login))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    let register_limiter = state.register_rate_limiter.clone();
    let register_route = Router::new()
        .route("/register", post(handlers::registration::register))
        .layer(from_fn_with_state(
            register_limiter,
            ip_rate_limit_middleware,
        ));

    // Routes behind a live session.
    let protected_routes = Router::new()
        .route("/authorize", get(handlers::authorize::authorize))
        .route("/authorize/revoke", post(handlers::authorize::revoke))
        .route("/totp/setup", post(handlers::login::totp_setup))
        .route("/users/me", get(handlers::user::get_me))
        .route("/organizations", post(handlers::organization::create))
        .route(
            "/organizations/:globalid",
            get(handlers::organization::get),
        )
        .route(
            "/organizations/:globalid/suborganizations",
            post(handlers::organization::create_sub),
        )
        .route(
            "/organizations/:globalid/owners",
            post(handlers::organization::add_owner),
        )
        .route(
            "/organizations/:globalid/owners/:username",
            delete(handlers::organization::remove_owner),
        )
        .route(
            "/organizations/:globalid/members",
            post(handlers::organization::add_member),
        )
        .route(
            "/organizations/:globalid/members/:username",
            delete(handlers::organization::remove_member),
        )
        .route(
            "/organizations/:globalid/orgowners",
            post(handlers::organization::add_org_owner),
        )
        .route(
            "/organizations/:globalid/orgmembers",
            post(handlers::organization::add_org_member),
        )
        .route(
            "/organizations/:globalid/orgowners/:other",
            delete(handlers::organization::remove_org_owner),
        )
        .route(
            "/organizations/:globalid/orgmembers/:other",
            delete(handlers::organization::remove_org_member),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_auth_middleware,
        ));

    let ip_limiter = state.ip_rate_limiter.clone();

    Router::new()
        .route("/health", get(health_check))
        .merge(login_route)
        .merge(register_route)
        .merge(protected_routes)
        .route(
            "/registersmsconfirmation",
            get(handlers::registration::sms_confirmation_info)
                .post(handlers::registration::confirm_sms),
        )
        .route(
            "/registerresendsms",
            post(handlers::registration::resend_sms),
        )
        .route(
            "/registrationsmsconfirmed",
            get(handlers::registration::sms_confirmed),
        )
        .route(
            "/phonevalidation",
            get(handlers::registration::phone_validation),
        )
        .route(
            "/logintotpconfirmation",
            get(handlers::login::totp_confirmation_info).post(handlers::login::confirm_totp),
        )
        .route(
            "/loginsmsconfirmation",
            get(handlers::login::sms_confirmation_info).post(handlers::login::confirm_sms),
        )
        .route("/loginresendsms", post(handlers::login::resend_sms))
        .route("/loginsmsconfirmed", get(handlers::login::sms_confirmed))
        .route("/logincancel", post(handlers::login::cancel))
        .route("/logout", get(handlers::login::logout))
        .route("/github_callback", get(handlers::social::github_callback))
        .route(
            "/facebook_callback",
            get(handlers::social::facebook_callback),
        )
        .with_state(state.clone())
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(
                |request: &service_core::axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            ),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(build_cors_layer(&state.config))
}

fn build_cors_layer(config: &IdentityConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(
            config
                .security
                .allowed_origins
                .iter()
                .filter_map(|origin| {
                    origin
                        .parse::<service_core::axum::http::HeaderValue>()
                        .map_err(|e| {
                            tracing::error!(origin = %origin, error = %e, "Invalid CORS origin, skipping");
                            e
                        })
                        .ok()
                })
                .collect::<Vec<_>>(),
        )
        .allow_credentials(true)
        .allow_methods([
            service_core::axum::http::Method::GET,
            service_core::axum::http::Method::POST,
            service_core::axum::http::Method::DELETE,
            service_core::axum::http::Method::OPTIONS,
        ])
        .allow_headers([service_core::axum::http::header::CONTENT_TYPE])
}

/// GET /health
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
