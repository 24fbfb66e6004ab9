//! Storefront API library
//!
//! Checkout pricing, payment finalisation and the administrator surface of
//! the storefront, exposed as an axum router.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;
pub mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{consts as perm, AuthRouterExt};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig, services: handlers::AppServices) -> Self {
        Self { db, config, services }
    }
}

/// Storefront routes callable without an administrator session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/stripe-checkout", post(handlers::checkout::card_checkout))
        .route("/api/paypal-checkout", post(handlers::checkout::wallet_checkout))
        .route("/api/paypal-capture", post(handlers::checkout::wallet_capture))
        .route(
            "/api/gift-card-only-checkout",
            post(handlers::checkout::gift_card_checkout),
        )
        .route("/api/webhooks", post(handlers::webhooks::card_webhook))
        .route("/api/orders", get(handlers::orders::public_lookup))
}

/// Administrator routes. Every one of them sits behind the IP allowlist;
/// the session and permission gates are layered per group.
pub fn admin_routes(state: &AppState) -> Router<AppState> {
    let gateway = state.services.gateway.clone();

    let login_flow = Router::new()
        .route(
            "/api/admin-auth",
            get(handlers::admin_auth::verify)
                .post(handlers::admin_auth::login)
                .delete(handlers::admin_auth::logout),
        )
        .route("/api/admin-refresh", post(handlers::admin_auth::refresh))
        .route("/api/admin-mfa/setup", post(handlers::admin_mfa::setup))
        .route("/api/admin-mfa/verify", post(handlers::admin_mfa::verify))
        .route("/api/admin-mfa/validate", post(handlers::admin_mfa::validate))
        .route("/api/admin-mfa/backup", post(handlers::admin_mfa::backup));

    let mfa_management = Router::new()
        .route("/api/admin-mfa/regenerate", post(handlers::admin_mfa::regenerate))
        .route("/api/admin-mfa/status", get(handlers::admin_mfa::status))
        .with_admin_session(gateway.clone());

    let orders_update = Router::new()
        .route(
            "/api/admin-orders/:id/status",
            patch(handlers::orders::update_status),
        )
        .with_permission(gateway.clone(), perm::ORDERS_UPDATE);

    let audit_read = Router::new()
        .route("/api/admin-audit", get(handlers::orders::audit_log))
        .with_permission(gateway, perm::AUDIT_READ);

    login_flow
        .merge(mfa_management)
        .merge(orders_update)
        .merge(audit_read)
        .layer(axum::middleware::from_fn_with_state(
            state.services.allowlist.clone(),
            middleware_helpers::ip_allowlist_middleware,
        ))
}

/// CORS for the storefront origins. Preflights are answered by the layer
/// itself with an empty 200.
pub fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                ::tracing::warn!(%origin, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(auth::cookies::CSRF_HEADER),
        ])
}

/// Full application router with the ambient layers applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    public_routes()
        .merge(admin_routes(&state))
        .layer(TraceLayer::new_for_http().make_span_with(crate::tracing::RequestSpanMaker))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
