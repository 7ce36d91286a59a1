//! Persistence interfaces used by the services.
//!
//! The services only talk to storage through these traits. Every method is
//! atomic at the single-record level; nothing here spans multiple records in a
//! transaction.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{
    AuditLogListResponse, AuditLogQuery, Loan, LoanStatus, NewAuditLog, Session, SortOrder,
    StatusFilter, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("A record with this {0} already exists")]
    Duplicate(&'static str),
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn create_loan(&self, loan: &Loan) -> Result<(), StoreError>;

    async fn get_loan_by_id(&self, id: &str) -> Result<Option<Loan>, StoreError>;

    async fn list_loans(
        &self,
        filter: StatusFilter,
        order: SortOrder,
    ) -> Result<Vec<Loan>, StoreError>;

    /// Persist `loan.status` and `loan.approved_at`, but only if the stored
    /// status is still `expected`. Returns `false` when nothing was written.
    async fn update_loan(&self, loan: &Loan, expected: LoanStatus) -> Result<bool, StoreError>;

    /// Returns `false` when no loan had this id.
    async fn delete_loan(&self, id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn count_users(&self) -> Result<i64, StoreError>;

    /// Insert `user` only if no user exists yet. Returns `false` if another
    /// account got there first.
    async fn insert_first_user(&self, user: &User) -> Result<bool, StoreError>;

    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn update_password(&self, user_id: &str, password_hash: &str)
        -> Result<(), StoreError>;

    /// Rename a user. A taken name fails with `StoreError::Duplicate`.
    async fn update_username(&self, user_id: &str, username: &str) -> Result<(), StoreError>;

    async fn activate_user(&self, user_id: &str) -> Result<(), StoreError>;

    async fn delete_user(&self, user_id: &str) -> Result<bool, StoreError>;

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Session whose access token hashes to `hash` and has not expired at `now`.
    async fn find_live_session_by_access_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Session whose refresh token hashes to `hash` and can still be refreshed at `now`.
    async fn find_live_session_by_refresh_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Soft-revoke a session by moving both expiries to `now`. Returns `false`
    /// when the session was already expired or revoked, so only one of two
    /// racing callers wins.
    async fn expire_session(&self, session_id: &str, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn expire_user_sessions(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<(), StoreError>;

    async fn list_audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<AuditLogListResponse, StoreError>;
}
