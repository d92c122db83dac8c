//! Security alert endpoints. Admin-only; the durable audit log is tailed out
//! of band, these endpoints only expose the in-memory alert ring.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::ApiError;
use crate::security::Alert;
use crate::AppState;

/// Current alerts, newest first
///
/// GET /api/security/alerts
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Json<Vec<Alert>> {
    Json(state.monitor.alerts())
}

/// Acknowledge an alert
///
/// POST /api/security/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.monitor.acknowledge(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Alert not found"))
    }
}
