pub mod audit;
pub mod auth;
pub mod error;
mod loans;
pub mod metrics;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify/:token", get(auth::verify))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password));

    // Any authenticated user
    let user_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/change-password", put(auth::change_password))
        .route("/users/:username", put(auth::update_user))
        .route("/loans", post(loans::apply))
        .route("/loans/:id", get(loans::get_loan))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // Admin only
    let admin_routes = Router::new()
        .route("/admin/loans", get(loans::list_loans))
        .route("/admin/loans/:id/status", patch(loans::update_status))
        .route("/admin/loans/:id", delete(loans::delete_loan))
        .route("/admin/users/:username", delete(auth::delete_user))
        .route("/admin/logs", get(audit::list_logs))
        .route_layer(middleware::from_fn(auth::admin_middleware))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
