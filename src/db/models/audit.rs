//! System log models for tracking user actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A new entry to be written to the system log
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl NewAuditLog {
    pub fn new(action: &'static str, resource_type: &'static str) -> Self {
        Self {
            action,
            resource_type,
            resource_id: None,
            user_id: None,
            details: None,
        }
    }

    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Response for listing system logs with pagination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogListResponse {
    pub items: Vec<AuditLog>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Query parameters for filtering system logs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// Filter by action (e.g., "loan.approve")
    pub action: Option<String>,
    /// Filter by user ID
    pub user_id: Option<String>,
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 50, max 100)
    pub per_page: Option<i64>,
}

/// Highest page number honoured by system log listings
pub const MAX_AUDIT_PAGE: i64 = 100_000;

impl AuditLogQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_AUDIT_PAGE)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(50).clamp(1, 100)
    }
}

/// Common audit action types
pub mod actions {
    // Auth actions
    pub const AUTH_REGISTER: &str = "auth.register";
    pub const AUTH_VERIFY: &str = "auth.verify";
    pub const AUTH_LOGIN: &str = "auth.login";
    pub const AUTH_LOGOUT: &str = "auth.logout";
    pub const AUTH_REFRESH: &str = "auth.refresh";
    pub const AUTH_PASSWORD_CHANGE: &str = "auth.password.change";
    pub const AUTH_PASSWORD_RESET: &str = "auth.password.reset";

    // User actions
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_DELETE: &str = "user.delete";

    // Loan actions
    pub const LOAN_APPLY: &str = "loan.apply";
    pub const LOAN_APPROVE: &str = "loan.approve";
    pub const LOAN_REJECT: &str = "loan.reject";
    pub const LOAN_DELETE: &str = "loan.delete";
}

/// Common resource types
pub mod resource_types {
    pub const USER: &str = "user";
    pub const SESSION: &str = "session";
    pub const LOAN: &str = "loan";
}
