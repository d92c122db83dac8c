pub mod auth;
mod backups;
mod error;
mod security;
mod visits;

pub use error::{ApiError, ErrorCode, ErrorResponse};

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public entry points; /me and friends check the token
    // themselves via the extractor)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/register", post(auth::register))
        .route("/me", get(auth::me))
        .route("/change-password", post(auth::change_password));

    let api_routes = Router::new()
        // Visit requests (submission is public)
        .route("/visit-requests", post(visits::submit_request))
        .route("/visit-requests", get(visits::list_requests))
        // Visits
        .route("/visits", post(visits::create_visit))
        .route("/visits/upcoming", get(visits::upcoming))
        .route("/visits/archived", get(visits::archived))
        .route("/visits/:id", get(visits::get_visit))
        .route("/visits/:id", put(visits::update_visit))
        .route("/visits/:id", delete(visits::delete_visit))
        // Accounts (admin)
        .route("/users", get(auth::list_users))
        .route("/users/:id/approve", post(auth::approve_user))
        .route("/users/:id", delete(auth::delete_user))
        // Backups (admin)
        .route("/backups", get(backups::list_backups))
        .route("/backups", post(backups::create_backup))
        .route("/backups/prune", post(backups::prune_backups))
        .route("/backups/:name/restore", post(backups::restore_backup))
        // Security alerts (admin)
        .route("/security/alerts", get(security::list_alerts))
        .route(
            "/security/alerts/:id/acknowledge",
            post(security::acknowledge_alert),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
