//! Admin API.
//!
//! Read-only views of the layer, behind a bearer token.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/sessions/{logical_id}", get(get_session))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
