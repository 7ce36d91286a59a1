use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::auth::Identity;
use crate::db::{
    actions, resource_types, ApplyLoanRequest, ApplyLoanResponse, ListLoansQuery, Loan,
    LoanStatus, NewAuditLog, UpdateLoanStatusRequest,
};
use crate::services::validation::validate_uuid;
use crate::AppState;

use super::audit::audit_log;
use super::auth::{AdminUser, MessageResponse};
use super::error::{ApiError, ApiJson};
use super::metrics;

fn loan_id(id: &str) -> Result<(), ApiError> {
    validate_uuid(id, "loan ID").map_err(|e| ApiError::validation_field("id", e))
}

/// POST /loans
pub async fn apply(
    State(state): State<Arc<AppState>>,
    caller: Identity,
    ApiJson(request): ApiJson<ApplyLoanRequest>,
) -> Result<(StatusCode, Json<ApplyLoanResponse>), ApiError> {
    let loan = state.loans.apply(&caller, request.amount).await?;
    metrics::record_loan_applied();

    audit_log(
        &state,
        NewAuditLog::new(actions::LOAN_APPLY, resource_types::LOAN)
            .resource(&loan.id)
            .by(&caller.user_id)
            .details(json!({ "amount": loan.amount })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(ApplyLoanResponse {
            id: loan.id,
            status: loan.status,
        }),
    ))
}

/// GET /loans/:id
pub async fn get_loan(
    State(state): State<Arc<AppState>>,
    caller: Identity,
    Path(id): Path<String>,
) -> Result<Json<Loan>, ApiError> {
    loan_id(&id)?;
    let loan = state.loans.view_status(&caller, &id).await?;
    Ok(Json(loan))
}

/// GET /admin/loans?status=&order=
pub async fn list_loans(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Query(query): Query<ListLoansQuery>,
) -> Result<Json<Vec<Loan>>, ApiError> {
    let loans = state
        .loans
        .view_all(&admin, &query.status, &query.order)
        .await?;
    Ok(Json(loans))
}

/// PATCH /admin/loans/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UpdateLoanStatusRequest>,
) -> Result<Json<Loan>, ApiError> {
    loan_id(&id)?;
    let status = request
        .status
        .ok_or_else(|| ApiError::validation_field("status", "status is required"))?;

    let loan = state.loans.decide(&admin, &id, &status).await?;
    metrics::record_loan_decision(loan.status);

    let action = match loan.status {
        LoanStatus::Approved => actions::LOAN_APPROVE,
        _ => actions::LOAN_REJECT,
    };
    audit_log(
        &state,
        NewAuditLog::new(action, resource_types::LOAN)
            .resource(&loan.id)
            .by(&admin.user_id)
            .details(json!({ "owner": loan.user_id, "amount": loan.amount })),
    )
    .await;

    Ok(Json(loan))
}

/// DELETE /admin/loans/:id
pub async fn delete_loan(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    loan_id(&id)?;
    state.loans.delete(&admin, &id).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::LOAN_DELETE, resource_types::LOAN)
            .resource(&id)
            .by(&admin.user_id),
    )
    .await;

    Ok(MessageResponse::new("Loan deleted"))
}
