//! SQLite implementation of the persistence traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuditStore, CredentialStore, LoanStore, StoreError};
use crate::db::{
    AuditLog, AuditLogListResponse, AuditLogQuery, DbPool, Loan, LoanStatus, NewAuditLog, Session,
    SortOrder, StatusFilter, User,
};

const LOAN_COLUMNS: &str = "id, user_id, amount, status, created_at, approved_at";

/// Store backed by the application's SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Translate unique-constraint failures into `StoreError::Duplicate`.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let msg = db_err.message();
            if msg.contains("users.username") {
                return StoreError::Duplicate("username");
            }
            if msg.contains("users.email") {
                return StoreError::Duplicate("email");
            }
            return StoreError::Duplicate("identifier");
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl LoanStore for SqliteStore {
    async fn create_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, user_id, amount, status, created_at, approved_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&loan.id)
        .bind(&loan.user_id)
        .bind(loan.amount)
        .bind(loan.status)
        .bind(loan.created_at)
        .bind(loan.approved_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn get_loan_by_id(&self, id: &str) -> Result<Option<Loan>, StoreError> {
        let sql = format!("SELECT {} FROM loans WHERE id = ?", LOAN_COLUMNS);
        let loan = sqlx::query_as::<_, Loan>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(loan)
    }

    async fn list_loans(
        &self,
        filter: StatusFilter,
        order: SortOrder,
    ) -> Result<Vec<Loan>, StoreError> {
        let direction = order.as_sql();
        let loans = match filter {
            StatusFilter::All => {
                let sql = format!(
                    "SELECT {} FROM loans ORDER BY created_at {}, id {}",
                    LOAN_COLUMNS, direction, direction
                );
                sqlx::query_as::<_, Loan>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
            StatusFilter::Only(status) => {
                let sql = format!(
                    "SELECT {} FROM loans WHERE status = ? ORDER BY created_at {}, id {}",
                    LOAN_COLUMNS, direction, direction
                );
                sqlx::query_as::<_, Loan>(&sql)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(loans)
    }

    async fn update_loan(&self, loan: &Loan, expected: LoanStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE loans SET status = ?, approved_at = ? WHERE id = ? AND status = ?",
        )
        .bind(loan.status)
        .bind(loan.approved_at)
        .bind(&loan.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_loan(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM loans WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn count_users(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_first_user(&self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM users)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_password(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_username(&self, user_id: &str, username: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET username = ?, updated_at = ? WHERE id = ?")
            .bind(username)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn activate_user(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_active = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, access_token_hash, refresh_token_hash, expires_at, refresh_expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.access_token_hash)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_live_session_by_access_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE access_token_hash = ? AND revoked_at IS NULL AND expires_at > ?",
        )
        .bind(hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn find_live_session_by_refresh_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE refresh_token_hash = ? AND revoked_at IS NULL AND refresh_expires_at > ?",
        )
        .bind(hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn expire_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET expires_at = ?, refresh_expires_at = ?, revoked_at = ?
            WHERE id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_user_sessions(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET expires_at = ?, refresh_expires_at = ?, revoked_at = ?
            WHERE user_id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let details_json = entry.details.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, resource_type, resource_id, user_id, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(entry.action)
        .bind(entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.user_id)
        .bind(&details_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            action = entry.action,
            resource_type = entry.resource_type,
            resource_id = entry.resource_id.as_deref(),
            user_id = entry.user_id.as_deref(),
            "Audit log recorded"
        );

        Ok(())
    }

    async fn list_audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<AuditLogListResponse, StoreError> {
        let page = query.page();
        let per_page = query.per_page();
        let offset = (page - 1).saturating_mul(per_page);

        // Build dynamic WHERE clause
        let mut conditions = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let Some(action) = &query.action {
            conditions.push("action = ?");
            bindings.push(action.clone());
        }

        if let Some(user_id) = &query.user_id {
            conditions.push("user_id = ?");
            bindings.push(user_id.clone());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for binding in &bindings {
            count_query = count_query.bind(binding);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT * FROM audit_logs {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut query_builder = sqlx::query_as::<_, AuditLog>(&sql);
        for binding in &bindings {
            query_builder = query_builder.bind(binding);
        }
        let items = query_builder
            .bind(per_page)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total_pages = (total + per_page - 1) / per_page;

        Ok(AuditLogListResponse {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }
}
