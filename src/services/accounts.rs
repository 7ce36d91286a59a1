//! Account workflow: registration, activation, login and password management.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthError, AuthService, Identity, IssuedTokens, TokenPurpose};
use crate::config::AuthConfig;
use crate::db::{RegisterRequest, Role, UpdateUserRequest, User};
use crate::notifications::Mailer;
use crate::store::{CredentialStore, StoreError};

use super::validation::{validate_email, validate_password, validate_username};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Current password is incorrect")]
    IncorrectPassword,
    #[error("Account is not activated, check your email for the verification link")]
    Inactive,
    #[error("User not found")]
    NotFound,
    #[error("Administrators cannot delete their own account")]
    SelfDelete,
    #[error("You may only update your own account")]
    NotOwner,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => {
                AccountError::Conflict(format!("A user with this {} already exists", field))
            }
            other => AccountError::Store(other),
        }
    }
}

pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    auth: Arc<AuthService>,
    mailer: Arc<dyn Mailer>,
    config: AuthConfig,
    public_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        auth: Arc<AuthService>,
        mailer: Arc<dyn Mailer>,
        config: AuthConfig,
        public_url: &str,
    ) -> Self {
        Self {
            store,
            auth,
            mailer,
            config,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    fn check_password(&self, password: &str) -> Result<(), AccountError> {
        validate_password(
            password,
            self.config.password_min_length,
            self.config.password_max_length,
        )
        .map_err(AccountError::Validation)
    }

    /// Create an account.
    ///
    /// The first account ever created becomes the administrator. The check and
    /// the insert happen in one statement, so two racing registrations cannot
    /// both claim the role.
    pub async fn register(&self, req: &RegisterRequest) -> Result<User, AccountError> {
        validate_username(&req.username).map_err(AccountError::Validation)?;
        validate_email(&req.email).map_err(AccountError::Validation)?;
        self.check_password(&req.password)?;

        if self.store.find_user_by_username(&req.username).await?.is_some() {
            return Err(AccountError::Conflict("Username already exists".into()));
        }
        if self.store.find_user_by_email(&req.email).await?.is_some() {
            return Err(AccountError::Conflict("Email already exists".into()));
        }

        let now = Utc::now();
        let mut user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: req.username.clone(),
            email: req.email.clone(),
            password_hash: auth::hash_password(&req.password)?,
            role: Role::User,
            is_active: !self.config.require_verification,
            created_at: now,
            updated_at: now,
        };

        let mut bootstrapped = false;
        if self.store.count_users().await? == 0 {
            user.role = Role::Admin;
            bootstrapped = self.store.insert_first_user(&user).await?;
            if !bootstrapped {
                user.role = Role::User;
            }
        }
        if !bootstrapped {
            self.store.create_user(&user).await?;
        }

        info!(user_id = %user.id, username = %user.username, role = %user.role, "User registered");

        if !user.is_active {
            let token = self.auth.issue_action_token(&user, TokenPurpose::Verify)?;
            let link = format!("{}/verify/{}", self.public_url, token);
            self.deliver(&user, &link, TokenPurpose::Verify).await;
        }

        Ok(user)
    }

    /// Send an action link, or log it when email is disabled. Delivery
    /// problems never undo the operation that produced the link.
    async fn deliver(&self, user: &User, link: &str, purpose: TokenPurpose) {
        if !self.mailer.is_enabled() {
            info!(username = %user.username, link = %link, ?purpose, "Email not configured, action link");
            return;
        }
        let result = match purpose {
            TokenPurpose::Reset => {
                self.mailer
                    .send_password_reset(&user.email, &user.username, link)
                    .await
            }
            _ => {
                self.mailer
                    .send_verification(&user.email, &user.username, link)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(username = %user.username, error = %e, "Failed to send account email");
        }
    }

    /// Activate the account named by a verification token.
    pub async fn verify(&self, token: &str) -> Result<User, AccountError> {
        let claims = self.auth.verify_action_token(token, TokenPurpose::Verify)?;
        let mut user = self
            .store
            .find_user_by_id(&claims.sub)
            .await?
            .ok_or(AccountError::NotFound)?;

        if !user.is_active {
            self.store.activate_user(&user.id).await?;
            user.is_active = true;
            info!(user_id = %user.id, "Account activated");
        }
        Ok(user)
    }

    /// Check credentials and open a session. Inactive accounts are refused
    /// before any token is issued.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(User, IssuedTokens), AccountError> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !auth::verify_password(password, &user.password_hash) {
            return Err(AccountError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AccountError::Inactive);
        }

        let tokens = self.auth.issue_session(&user).await?;
        info!(user_id = %user.id, "User logged in");
        Ok((user, tokens))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, IssuedTokens), AccountError> {
        Ok(self.auth.refresh(refresh_token).await?)
    }

    pub async fn logout(&self, caller: &Identity) -> Result<(), AccountError> {
        self.auth.revoke(&caller.session_id).await?;
        info!(user_id = %caller.user_id, "User logged out");
        Ok(())
    }

    pub async fn change_password(
        &self,
        caller: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        let user = self
            .store
            .find_user_by_id(&caller.user_id)
            .await?
            .ok_or(AccountError::NotFound)?;

        if !auth::verify_password(current_password, &user.password_hash) {
            return Err(AccountError::IncorrectPassword);
        }
        self.check_password(new_password)?;

        let hash = auth::hash_password(new_password)?;
        self.store.update_password(&user.id, &hash).await?;
        info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    /// Email a password reset link. Unknown usernames succeed silently so the
    /// endpoint cannot be used to probe for accounts.
    pub async fn forgot_password(&self, username: &str) -> Result<(), AccountError> {
        let Some(user) = self.store.find_user_by_username(username).await? else {
            debug!(username = %username, "Password reset requested for unknown user");
            return Ok(());
        };

        let token = self.auth.issue_action_token(&user, TokenPurpose::Reset)?;
        let link = format!("{}/reset-password?token={}", self.public_url, token);
        self.deliver(&user, &link, TokenPurpose::Reset).await;
        Ok(())
    }

    /// Set a new password from a reset token and end every open session.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<User, AccountError> {
        let claims = self.auth.verify_action_token(token, TokenPurpose::Reset)?;
        self.check_password(new_password)?;

        let user = self
            .store
            .find_user_by_id(&claims.sub)
            .await?
            .ok_or(AccountError::NotFound)?;
        // A used link no longer matches the password it was issued against
        if !claims.is_current_for(&user) {
            return Err(AuthError::InvalidToken.into());
        }

        let hash = auth::hash_password(new_password)?;
        self.store.update_password(&user.id, &hash).await?;
        let revoked = self.auth.revoke_all(&user.id).await?;
        info!(user_id = %user.id, revoked_sessions = revoked, "Password reset");
        Ok(user)
    }

    /// Change the username and/or password of `username`'s account.
    ///
    /// Callers may update their own account; admins may update any account.
    /// Usernames follow the registration rules and must stay unique.
    pub async fn update_user(
        &self,
        caller: &Identity,
        username: &str,
        req: &UpdateUserRequest,
    ) -> Result<User, AccountError> {
        if req.username.is_none() && req.password.is_none() {
            return Err(AccountError::Validation(
                "Provide a new username or password".into(),
            ));
        }

        let mut user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)?;
        if user.id != caller.user_id && !AuthService::authorize(caller.role, Role::Admin) {
            return Err(AccountError::NotOwner);
        }

        if let Some(new_name) = &req.username {
            validate_username(new_name).map_err(AccountError::Validation)?;
        }
        if let Some(password) = &req.password {
            self.check_password(password)?;
        }

        if let Some(new_name) = req.username.as_ref().filter(|n| **n != user.username) {
            if self.store.find_user_by_username(new_name).await?.is_some() {
                return Err(AccountError::Conflict("Username already exists".into()));
            }
            self.store.update_username(&user.id, new_name).await?;
            user.username = new_name.clone();
        }
        if let Some(password) = &req.password {
            let hash = auth::hash_password(password)?;
            self.store.update_password(&user.id, &hash).await?;
            user.password_hash = hash;
        }

        info!(user_id = %user.id, by = %caller.username, "User updated");
        Ok(user)
    }

    /// Remove an account (admin only). Sessions go with it.
    pub async fn delete_user(&self, caller: &Identity, username: &str) -> Result<User, AccountError> {
        AuthService::require(caller, Role::Admin)?;

        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)?;
        if user.id == caller.user_id {
            return Err(AccountError::SelfDelete);
        }

        if !self.store.delete_user(&user.id).await? {
            return Err(AccountError::NotFound);
        }
        info!(user_id = %user.id, admin = %caller.username, "User deleted");
        Ok(user)
    }
}
