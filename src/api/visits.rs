//! Visit endpoints.
//!
//! Request submission is the one public write: families ask for a visit
//! without an account. Everything else requires an authenticated user.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use crate::models::{AssignedVisit, NewAssignedVisit, NewVisitRequest, Visit, VisitPatch, VisitRequest};
use crate::visits::VisitRegistry;
use crate::AppState;

/// Submit a visit request (public)
///
/// POST /api/visit-requests
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewVisitRequest>,
) -> Result<(StatusCode, Json<VisitRequest>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if request.name.trim().is_empty() {
        errors.add("name", "Name is required");
    }
    if request.phone.trim().is_empty() {
        errors.add("phone", "Phone number is required");
    }
    if request.address.trim().is_empty() {
        errors.add("address", "Address is required");
    }
    errors.finish()?;

    let created = state.visits.create_request(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List pending visit requests, oldest first
///
/// GET /api/visit-requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<VisitRequest>>, ApiError> {
    Ok(Json(state.visits.requests().await?))
}

/// Create a scheduled visit directly
///
/// POST /api/visits
pub async fn create_visit(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Json(request): Json<NewAssignedVisit>,
) -> Result<(StatusCode, Json<AssignedVisit>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if request.name.trim().is_empty() {
        errors.add("name", "Name is required");
    }
    errors.finish()?;

    let created = state.visits.create_assigned(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Fetch one visit in either stage
///
/// GET /api/visits/:id
pub async fn get_visit(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Visit>, ApiError> {
    state
        .visits
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Visit not found"))
}

/// Patch a visit. Supplying a date on a pending request schedules it.
///
/// PUT /api/visits/:id
pub async fn update_visit(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<VisitPatch>,
) -> Result<Json<Visit>, ApiError> {
    Ok(Json(state.visits.update(&id, patch).await?))
}

/// DELETE /api/visits/:id
pub async fn delete_visit(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.visits.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Scheduled visits from today onward
///
/// GET /api/visits/upcoming
pub async fn upcoming(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<AssignedVisit>>, ApiError> {
    Ok(Json(state.visits.upcoming(VisitRegistry::today()).await?))
}

/// Past and canceled visits
///
/// GET /api/visits/archived
pub async fn archived(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<AssignedVisit>>, ApiError> {
    Ok(Json(state.visits.archived(VisitRegistry::today()).await?))
}
