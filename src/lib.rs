//! Retail Ledger Library
//!
//! Financial ledger and transaction engine for a retail-banking backend.
//! Re-exports modules for the server binary, tools and integration tests.

pub mod api;
pub mod auth;
pub mod authorization;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod handlers;
pub mod jobs;
pub mod mutator;
pub mod rates;
pub mod store;

use std::time::Duration;

use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use api::AppState;
pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use error::{AppError, AppResult, ErrorResponse};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    // Request order: trace -> timeout -> logging -> auth -> handler
    let api_routes = api::create_router(state.clone())
        .layer(middleware::from_fn(api::middleware::logging_middleware));

    Router::new()
        // Health check (no auth)
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
