//! Backup administration endpoints. Admin-only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::auth::AdminUser;
use super::error::ApiError;
use crate::backup::{PruneReport, RestoreOutcome, SnapshotInfo, SnapshotKind};
use crate::security::EventType;
use crate::AppState;

fn engine(state: &AppState) -> Result<&Arc<crate::backup::BackupEngine>, ApiError> {
    state
        .backups
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Backups are disabled"))
}

/// List all known snapshots, newest first
///
/// GET /api/backups
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<SnapshotInfo>>, ApiError> {
    Ok(Json(engine(&state)?.list_snapshots().await?))
}

/// Take a manual snapshot
///
/// POST /api/backups
pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> Result<(StatusCode, Json<SnapshotInfo>), ApiError> {
    let snapshot = engine(&state)?.create_snapshot(SnapshotKind::Manual).await?;

    state
        .monitor
        .record(
            EventType::BackupCreated,
            serde_json::json!({ "name": snapshot.name, "by": admin.user.email }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Restore the store from a snapshot. The current state is snapshotted
/// first, so a bad restore is itself recoverable.
///
/// POST /api/backups/:name/restore
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(name): Path<String>,
) -> Result<Json<RestoreOutcome>, ApiError> {
    let outcome = engine(&state)?.restore(&name).await?;

    info!(snapshot = %name, by = %admin.user.email, "Store restored from snapshot");
    state
        .monitor
        .record(
            EventType::BackupRestored,
            serde_json::json!({
                "name": name,
                "by": admin.user.email,
                "pre_restore_snapshot": outcome.pre_restore_snapshot,
            }),
        )
        .await;

    Ok(Json(outcome))
}

/// Run the retention prune immediately
///
/// POST /api/backups/prune
pub async fn prune_backups(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<PruneReport>, ApiError> {
    let retention = state.config.backup.retention_days;
    Ok(Json(engine(&state)?.prune(retention).await?))
}
