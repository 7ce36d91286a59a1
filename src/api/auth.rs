//! Bearer authentication for the router plus the account endpoints.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{AuthError, AuthService, Identity, IssuedTokens};
use crate::db::{
    actions, resource_types, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    LoginResponse, NewAuditLog, RefreshRequest, RegisterRequest, ResetPasswordRequest, Role,
    UpdateUserRequest, User, UserResponse,
};
use crate::AppState;

use super::audit::audit_log;
use super::error::{ApiError, ApiJson};

/// Pull the bearer token out of the Authorization header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the caller and stash their identity in the request extensions
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let identity = state.auth.authenticate(&token).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Gate a route group on the admin role. Must run after `auth_middleware`.
pub async fn admin_middleware(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .ok_or(AuthError::MissingToken)?;
    AuthService::require(identity, Role::Admin)?;
    Ok(next.run(request).await)
}

/// Extractor for the authenticated caller. Reuses the identity resolved by
/// `auth_middleware` when present.
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }
        let token = extract_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        Ok(state.auth.authenticate(&token).await?)
    }
}

/// Extractor that additionally requires the admin role
pub struct AdminUser(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        AuthService::require(&identity, Role::Admin)?;
        Ok(AdminUser(identity))
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

fn login_response(user: User, tokens: IssuedTokens) -> Json<LoginResponse> {
    Json(LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_at: tokens.expires_at,
        user: UserResponse::from(user),
    })
}

/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state.accounts.register(&request).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_REGISTER, resource_types::USER)
            .resource(&user.id)
            .by(&user.id)
            .details(json!({ "username": user.username, "role": user.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// GET /verify/:token
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = state.accounts.verify(&token).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_VERIFY, resource_types::USER)
            .resource(&user.id)
            .by(&user.id),
    )
    .await;

    Ok(MessageResponse::new("Account activated"))
}

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (user, tokens) = state
        .accounts
        .login(&request.username, &request.password)
        .await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_LOGIN, resource_types::SESSION)
            .resource(&tokens.session_id)
            .by(&user.id),
    )
    .await;

    Ok(login_response(user, tokens))
}

/// POST /refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (user, tokens) = state.accounts.refresh(&request.refresh_token).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_REFRESH, resource_types::SESSION)
            .resource(&tokens.session_id)
            .by(&user.id),
    )
    .await;

    Ok(login_response(user, tokens))
}

/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    caller: Identity,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.logout(&caller).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_LOGOUT, resource_types::SESSION)
            .resource(&caller.session_id)
            .by(&caller.user_id),
    )
    .await;

    Ok(MessageResponse::new("Logged out"))
}

/// PUT /change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    caller: Identity,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .accounts
        .change_password(&caller, &request.current_password, &request.new_password)
        .await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_PASSWORD_CHANGE, resource_types::USER)
            .resource(&caller.user_id)
            .by(&caller.user_id),
    )
    .await;

    Ok(MessageResponse::new("Password changed"))
}

/// POST /forgot-password
///
/// Always answers the same way, whether or not the account exists.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.forgot_password(&request.username).await?;
    Ok(MessageResponse::new(
        "If the account exists, a password reset link has been sent",
    ))
}

/// POST /reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = state
        .accounts
        .reset_password(&request.token, &request.new_password)
        .await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::AUTH_PASSWORD_RESET, resource_types::USER)
            .resource(&user.id)
            .by(&user.id),
    )
    .await;

    Ok(MessageResponse::new("Password has been reset"))
}

/// PUT /users/:username
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    caller: Identity,
    Path(username): Path<String>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .accounts
        .update_user(&caller, &username, &request)
        .await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::USER_UPDATE, resource_types::USER)
            .resource(&user.id)
            .by(&caller.user_id)
            .details(json!({
                "username": user.username,
                "previous_username": username,
                "password_changed": request.password.is_some(),
            })),
    )
    .await;

    Ok(Json(UserResponse::from(user)))
}

/// DELETE /admin/users/:username
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(username): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = state.accounts.delete_user(&admin, &username).await?;

    audit_log(
        &state,
        NewAuditLog::new(actions::USER_DELETE, resource_types::USER)
            .resource(&user.id)
            .by(&admin.user_id)
            .details(json!({ "username": user.username })),
    )
    .await;

    Ok(MessageResponse::new(format!("User {} deleted", username)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("abc.def.ghi".to_string()));

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(extract_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }
}
