//! HTTP routes

pub mod auth;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

/// Build the API router
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public_routes = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh));

    let protected_routes = Router::new()
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/validate", get(auth::validate))
        .route("/api/v1/auth/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
