//! Storefront API Library
//!
//! Order fulfillment and payment settlement for a small online store:
//! stock reservation, coupons, and a signed redirect payment gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{http::HeaderValue, middleware, Router};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::{auth_middleware, AuthConfig, AuthService};
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::repositories::Stores;

// App state definition
#[derive(Clone)]
pub struct AppState {
    /// Present when running on the database backend
    pub db: Option<Arc<DatabaseConnection>>,
    pub config: Arc<AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Builds the state from already-constructed stores
    pub fn new(
        config: AppConfig,
        stores: &Stores,
        db: Option<Arc<DatabaseConnection>>,
        event_sender: EventSender,
    ) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&config)));
        let services = handlers::AppServices::new(stores, &config, event_sender);
        Self {
            db,
            config: Arc::new(config),
            services,
            auth,
        }
    }
}

/// Versioned JSON API. Everything except the gateway callbacks requires a
/// bearer token.
pub fn api_v1_routes(state: &AppState) -> Router<AppState> {
    let authenticated = Router::new()
        .merge(handlers::orders::order_routes())
        .merge(handlers::payments::payment_routes())
        .merge(handlers::coupons::coupon_routes())
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(authenticated)
        // Gateway callbacks are verified by signature instead
        .merge(handlers::payments::gateway_callback_routes())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        if config.is_development() {
            ::tracing::info!("Using permissive CORS in development");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        }
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Full application router with every middleware layer applied
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .nest("/api/v1", api_v1_routes(&state))
        .merge(handlers::health::health_routes())
        .merge(openapi::openapi_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::http_trace_layer())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer(&state.config))
        // Ensure every request carries a request id for traceability
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
