//! Loan records and the loan status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a loan.
///
/// `Pending` is the only non-terminal state. Once a loan is approved or
/// rejected it can no longer change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
}

impl LoanStatus {
    /// Whether a loan in this state may move to `next`. Only a pending loan
    /// moves, and only into a terminal state.
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Approved | LoanStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "rejected" => Ok(LoanStatus::Rejected),
            _ => Err(format!(
                "Unknown loan status '{}'. Must be one of: pending, approved, rejected",
                s
            )),
        }
    }
}

/// Status filter for loan listings. `all` disables filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(LoanStatus),
}

impl Default for StatusFilter {
    fn default() -> Self {
        StatusFilter::All
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(StatusFilter::All);
        }
        s.parse().map(StatusFilter::Only)
    }
}

/// Ordering on `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Parse a user-supplied order. Anything other than `desc` sorts ascending.
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// A loan application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// Build a fresh pending loan with a server-assigned id and timestamp.
    pub fn new_pending(user_id: &str, amount: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            status: LoanStatus::Pending,
            created_at: Utc::now(),
            approved_at: None,
        }
    }

    /// Apply a status transition, stamping `approved_at` on approval.
    ///
    /// The caller is responsible for checking `can_transition_to` first.
    pub fn with_status(mut self, status: LoanStatus, now: DateTime<Utc>) -> Self {
        self.status = status;
        self.approved_at = match status {
            LoanStatus::Approved => Some(now.max(self.created_at)),
            _ => None,
        };
        self
    }
}

// DTOs for API

/// Body of `POST /loans`. Any client-supplied id, status or timestamp is ignored.
#[derive(Debug, Deserialize)]
pub struct ApplyLoanRequest {
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ApplyLoanResponse {
    pub id: String,
    pub status: LoanStatus,
}

/// Body of `PATCH /admin/loans/:id/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateLoanStatusRequest {
    pub status: Option<String>,
}

/// Query string of `GET /admin/loans`.
#[derive(Debug, Deserialize)]
pub struct ListLoansQuery {
    #[serde(default = "default_status_filter")]
    pub status: String,
    #[serde(default = "default_order")]
    pub order: String,
}

fn default_status_filter() -> String {
    "all".to_string()
}

fn default_order() -> String {
    "asc".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert!(LoanStatus::Pending.can_transition_to(LoanStatus::Approved));
        assert!(LoanStatus::Pending.can_transition_to(LoanStatus::Rejected));
        assert!(!LoanStatus::Pending.can_transition_to(LoanStatus::Pending));
        assert!(!LoanStatus::Approved.can_transition_to(LoanStatus::Rejected));
        assert!(!LoanStatus::Approved.can_transition_to(LoanStatus::Pending));
        assert!(!LoanStatus::Rejected.can_transition_to(LoanStatus::Approved));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LoanStatus::Pending.is_terminal());
        assert!(LoanStatus::Approved.is_terminal());
        assert!(LoanStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_status_parsing_is_closed() {
        assert_eq!("approved".parse::<LoanStatus>(), Ok(LoanStatus::Approved));
        assert!("APPROVED".parse::<LoanStatus>().is_err());
        assert!("cancelled".parse::<LoanStatus>().is_err());
        assert!("".parse::<LoanStatus>().is_err());
    }

    #[test]
    fn test_status_filter() {
        assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!(
            "rejected".parse::<StatusFilter>(),
            Ok(StatusFilter::Only(LoanStatus::Rejected))
        );
        assert!("bogus".parse::<StatusFilter>().is_err());
    }

    #[test]
    fn test_sort_order_defaults_to_ascending() {
        assert_eq!(SortOrder::parse_lenient("desc"), SortOrder::Desc);
        assert_eq!(SortOrder::parse_lenient("DESC"), SortOrder::Desc);
        assert_eq!(SortOrder::parse_lenient("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse_lenient("sideways"), SortOrder::Asc);
        assert_eq!(SortOrder::parse_lenient(""), SortOrder::Asc);
    }

    #[test]
    fn test_new_pending_loan() {
        let loan = Loan::new_pending("user-1", 500.0);
        assert_eq!(loan.status, LoanStatus::Pending);
        assert!(loan.approved_at.is_none());
        assert!(uuid::Uuid::parse_str(&loan.id).is_ok());
    }

    #[test]
    fn test_approval_stamps_timestamp() {
        let loan = Loan::new_pending("user-1", 500.0);
        let created = loan.created_at;
        let approved = loan.with_status(LoanStatus::Approved, Utc::now());
        assert_eq!(approved.status, LoanStatus::Approved);
        assert!(approved.approved_at.unwrap() >= created);
    }

    #[test]
    fn test_rejection_leaves_approved_at_unset() {
        let loan = Loan::new_pending("user-1", 500.0);
        let rejected = loan.with_status(LoanStatus::Rejected, Utc::now());
        assert!(rejected.approved_at.is_none());
    }
}
