//! System log endpoint and the helper handlers use to write entries.

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::db::{AuditLogListResponse, AuditLogQuery, NewAuditLog};
use crate::AppState;

use super::auth::AdminUser;
use super::error::ApiError;

/// Record an entry in the system log. Failures are logged and swallowed so
/// they never fail the request that triggered them.
pub async fn audit_log(state: &AppState, entry: NewAuditLog) {
    if let Err(e) = state.audit.insert_audit_log(&entry).await {
        tracing::warn!(
            action = entry.action,
            resource_type = entry.resource_type,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// List system log entries, newest first
///
/// Query parameters:
/// - action: Filter by action type (e.g., "loan.approve")
/// - user_id: Filter by acting user
/// - page: Page number (1-indexed, defaults to 1)
/// - per_page: Items per page (defaults to 50, max 100)
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    let result = state.audit.list_audit_logs(&query).await?;
    Ok(Json(result))
}
