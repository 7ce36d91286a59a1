//! Authentication and authorization.
//!
//! Access tokens are HS256 JWTs signed with the configured secret. Every access
//! token is bound to a session row holding the SHA-256 of the token, so a token
//! stops working as soon as its session expires or is revoked at logout, even
//! while the JWT itself is still within its lifetime.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::{Role, Session, User};
use crate::store::{CredentialStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Session has expired or was revoked")]
    SessionExpired,
    #[error("This action requires the {0} role")]
    Forbidden(Role),
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("Failed to hash password: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub session_id: String,
}

/// What a token may be used for. A token minted for one purpose is rejected
/// everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Verify,
    Reset,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    username: String,
    role: Role,
    sid: String,
    purpose: TokenPurpose,
    iat: i64,
    exp: i64,
}

/// Claims of a single-purpose link token (email verification, password reset).
///
/// `fgp` fingerprints the password hash at issue time, so a reset link stops
/// working once the password it was meant to replace has changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionClaims {
    pub sub: String,
    pub username: String,
    pub purpose: TokenPurpose,
    pub fgp: String,
    pub iat: i64,
    pub exp: i64,
}

impl ActionClaims {
    /// Whether the token was minted against `user`'s current password.
    pub fn is_current_for(&self, user: &User) -> bool {
        self.sub == user.id && self.fgp == credential_fingerprint(&user.password_hash)
    }
}

/// Tokens handed to a client after login or refresh
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random opaque token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn credential_fingerprint(password_hash: &str) -> String {
    hash_token(password_hash)[..16].to_string()
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    action_ttl: Duration,
}

impl AuthService {
    /// The signing secret comes from configuration; nothing is hard-coded.
    pub fn new(store: Arc<dyn CredentialStore>, config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::minutes(config.refresh_token_ttl_minutes),
            action_ttl: Duration::minutes(config.action_token_ttl_minutes),
        }
    }

    /// Whether `role` is allowed to perform an action requiring `required`.
    pub fn authorize(role: Role, required: Role) -> bool {
        role.has_at_least(required)
    }

    /// `authorize` as a `Result`, for use with `?`.
    pub fn require(identity: &Identity, required: Role) -> Result<(), AuthError> {
        if Self::authorize(identity.role, required) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(required))
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation
    }

    /// Create a new session for `user` and return its tokens.
    pub async fn issue_session(&self, user: &User) -> Result<IssuedTokens, AuthError> {
        let now = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();
        let expires_at = now + self.access_ttl;

        let claims = AccessClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            sid: session_id.clone(),
            purpose: TokenPurpose::Access,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)?;
        let refresh_token = generate_token();

        let session = Session {
            id: session_id.clone(),
            user_id: user.id.clone(),
            access_token_hash: hash_token(&access_token),
            refresh_token_hash: hash_token(&refresh_token),
            expires_at,
            refresh_expires_at: now + self.refresh_ttl,
            revoked_at: None,
            created_at: now,
        };
        self.store.insert_session(&session).await?;

        tracing::debug!(user_id = %user.id, session_id = %session_id, "Session issued");

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            expires_at,
            session_id,
        })
    }

    /// Resolve a bearer token to the caller's identity.
    ///
    /// The role is read from the current user record, not from the token, so
    /// role changes and deletions take effect immediately.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &Self::validation())
            .map_err(|_| AuthError::InvalidToken)?
            .claims;
        if claims.purpose != TokenPurpose::Access {
            return Err(AuthError::InvalidToken);
        }

        let session = self
            .store
            .find_live_session_by_access_hash(&hash_token(token), Utc::now())
            .await?
            .ok_or(AuthError::SessionExpired)?;
        if session.id != claims.sid || session.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .store
            .find_user_by_id(&session.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        Ok(Identity {
            user_id: user.id,
            username: user.username,
            role: user.role,
            session_id: session.id,
        })
    }

    /// Exchange a refresh token for a fresh session. The old session is revoked.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, IssuedTokens), AuthError> {
        let now = Utc::now();
        let session = self
            .store
            .find_live_session_by_refresh_hash(&hash_token(refresh_token), now)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .store
            .find_user_by_id(&session.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        // Only one caller can revoke a live session; the loser gets nothing
        if !self.store.expire_session(&session.id, now).await? {
            return Err(AuthError::InvalidToken);
        }
        let tokens = self.issue_session(&user).await?;
        Ok((user, tokens))
    }

    /// Soft-revoke a session (logout). The row is kept with its expiry set to now.
    pub async fn revoke(&self, session_id: &str) -> Result<(), AuthError> {
        self.store.expire_session(session_id, Utc::now()).await?;
        tracing::debug!(session_id = %session_id, "Session revoked");
        Ok(())
    }

    /// Revoke every live session belonging to a user.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, AuthError> {
        Ok(self.store.expire_user_sessions(user_id, Utc::now()).await?)
    }

    /// Mint a short-lived token for an emailed link.
    pub fn issue_action_token(&self, user: &User, purpose: TokenPurpose) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = ActionClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            purpose,
            fgp: credential_fingerprint(&user.password_hash),
            iat: now.timestamp(),
            exp: (now + self.action_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)
    }

    pub fn verify_action_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<ActionClaims, AuthError> {
        let claims = decode::<ActionClaims>(token, &self.decoding_key, &Self::validation())
            .map_err(|_| AuthError::InvalidToken)?
            .claims;
        if claims.purpose != purpose {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit-test-signing-secret".to_string(),
            ..AuthConfig::default()
        }
    }

    async fn setup(config: AuthConfig) -> (AuthService, Arc<SqliteStore>, User) {
        let store = Arc::new(SqliteStore::new(crate::db::init_memory().await.unwrap()));
        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: hash_password("correct-horse").unwrap(),
            role: Role::User,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.create_user(&user).await.unwrap();
        let service = AuthService::new(store.clone(), &config);
        (service, store, user)
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct-horse").unwrap();
        assert!(verify_password("correct-horse", &hash));
        assert!(!verify_password("wrong-horse", &hash));
        assert!(!verify_password("correct-horse", "not-a-phc-string"));
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
        assert_eq!(generate_token().len(), 64);
    }

    #[test]
    fn test_authorize() {
        assert!(AuthService::authorize(Role::Admin, Role::Admin));
        assert!(AuthService::authorize(Role::Admin, Role::User));
        assert!(AuthService::authorize(Role::User, Role::User));
        assert!(!AuthService::authorize(Role::User, Role::Admin));
    }

    #[tokio::test]
    async fn test_issue_and_authenticate() {
        let (auth, _, user) = setup(config()).await;
        let tokens = auth.issue_session(&user).await.unwrap();

        let identity = auth.authenticate(&tokens.access_token).await.unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.session_id, tokens.session_id);
    }

    #[tokio::test]
    async fn test_garbage_and_foreign_tokens_rejected() {
        let (auth, store, user) = setup(config()).await;
        assert!(matches!(
            auth.authenticate("not-a-jwt").await,
            Err(AuthError::InvalidToken)
        ));

        let other = AuthService::new(
            store,
            &AuthConfig {
                jwt_secret: "a-completely-different-secret".to_string(),
                ..AuthConfig::default()
            },
        );
        let tokens = other.issue_session(&user).await.unwrap();
        assert!(matches!(
            auth.authenticate(&tokens.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let (auth, _, user) = setup(config()).await;
        let tokens = auth.issue_session(&user).await.unwrap();
        auth.revoke(&tokens.session_id).await.unwrap();

        assert!(matches!(
            auth.authenticate(&tokens.access_token).await,
            Err(AuthError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (auth, _, user) = setup(AuthConfig {
            access_token_ttl_minutes: -1,
            ..config()
        })
        .await;
        let tokens = auth.issue_session(&user).await.unwrap();
        assert!(matches!(
            auth.authenticate(&tokens.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_session() {
        let (auth, _, user) = setup(config()).await;
        let first = auth.issue_session(&user).await.unwrap();

        let (refreshed_user, second) = auth.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(refreshed_user.id, user.id);
        assert_ne!(first.session_id, second.session_id);

        // The old pair is dead, the new one works
        assert!(auth.authenticate(&first.access_token).await.is_err());
        assert!(auth.refresh(&first.refresh_token).await.is_err());
        assert!(auth.authenticate(&second.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_rotates_once() {
        let (auth, _, user) = setup(config()).await;
        let tokens = auth.issue_session(&user).await.unwrap();

        let (a, b) = tokio::join!(
            auth.refresh(&tokens.refresh_token),
            auth.refresh(&tokens.refresh_token)
        );
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one refresh may succeed"
        );
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (auth, _, user) = setup(config()).await;
        let a = auth.issue_session(&user).await.unwrap();
        let b = auth.issue_session(&user).await.unwrap();

        assert_eq!(auth.revoke_all(&user.id).await.unwrap(), 2);
        assert!(auth.authenticate(&a.access_token).await.is_err());
        assert!(auth.authenticate(&b.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_action_tokens_are_purpose_bound() {
        let (auth, _, user) = setup(config()).await;
        let verify = auth.issue_action_token(&user, TokenPurpose::Verify).unwrap();

        let claims = auth
            .verify_action_token(&verify, TokenPurpose::Verify)
            .unwrap();
        assert_eq!(claims.sub, user.id);
        assert!(auth
            .verify_action_token(&verify, TokenPurpose::Reset)
            .is_err());

        // Action tokens are never accepted as bearer tokens
        assert!(auth.authenticate(&verify).await.is_err());
    }

    #[tokio::test]
    async fn test_action_token_tied_to_current_password() {
        let (auth, _, mut user) = setup(config()).await;
        let reset = auth.issue_action_token(&user, TokenPurpose::Reset).unwrap();
        let claims = auth.verify_action_token(&reset, TokenPurpose::Reset).unwrap();
        assert!(claims.is_current_for(&user));

        user.password_hash = hash_password("another-horse").unwrap();
        assert!(!claims.is_current_for(&user));
    }
}
