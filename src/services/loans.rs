//! Loan workflow engine.
//!
//! Owns the loan state machine and the authorization rules around it. All
//! state lives in the [`LoanStore`]; the engine itself holds nothing mutable,
//! so concurrent requests only interact through the store's conditional update.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{AuthError, AuthService, Identity};
use crate::config::LoanConfig;
use crate::db::{Loan, LoanStatus, Role, SortOrder, StatusFilter};
use crate::store::{LoanStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LoanError {
    #[error("Loan not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("Cannot change loan status from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

pub struct LoanWorkflow {
    store: Arc<dyn LoanStore>,
    config: LoanConfig,
}

impl LoanWorkflow {
    pub fn new(store: Arc<dyn LoanStore>, config: LoanConfig) -> Self {
        Self { store, config }
    }

    fn check_amount(&self, amount: Option<f64>) -> Result<f64, LoanError> {
        let amount = amount.ok_or_else(|| LoanError::Validation("amount is required".into()))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LoanError::Validation(
                "amount must be a positive number".into(),
            ));
        }
        if let Some(min) = self.config.min_amount {
            if amount < min {
                return Err(LoanError::Validation(format!(
                    "amount must be at least {}",
                    min
                )));
            }
        }
        if let Some(max) = self.config.max_amount {
            if amount > max {
                return Err(LoanError::Validation(format!(
                    "amount must not exceed {}",
                    max
                )));
            }
        }
        Ok(amount)
    }

    /// Submit a new loan for the caller. The loan always starts `pending`.
    pub async fn apply(&self, caller: &Identity, amount: Option<f64>) -> Result<Loan, LoanError> {
        let amount = self.check_amount(amount)?;
        let loan = Loan::new_pending(&caller.user_id, amount);
        self.store.create_loan(&loan).await?;

        info!(loan_id = %loan.id, user_id = %caller.user_id, amount, "Loan application received");
        Ok(loan)
    }

    /// Fetch a single loan. Visible to its owner and to admins.
    pub async fn view_status(&self, caller: &Identity, loan_id: &str) -> Result<Loan, LoanError> {
        let loan = self
            .store
            .get_loan_by_id(loan_id)
            .await?
            .ok_or(LoanError::NotFound)?;

        if loan.user_id != caller.user_id {
            AuthService::require(caller, Role::Admin)?;
        }
        Ok(loan)
    }

    /// List loans for review. `status` is `all` or an exact status; `order`
    /// is `asc` or `desc`, anything else sorts ascending.
    pub async fn view_all(
        &self,
        caller: &Identity,
        status: &str,
        order: &str,
    ) -> Result<Vec<Loan>, LoanError> {
        AuthService::require(caller, Role::Admin)?;
        let filter: StatusFilter = status.parse().map_err(LoanError::Validation)?;
        let order = SortOrder::parse_lenient(order);

        let loans = self.store.list_loans(filter, order).await?;
        debug!(count = loans.len(), ?filter, ?order, "Listed loans");
        Ok(loans)
    }

    /// Approve or reject a pending loan.
    ///
    /// The write only lands if the loan is still in the status it was read
    /// with. When another decision got there first this fails with
    /// `InvalidTransition` from the status that decision produced.
    pub async fn decide(
        &self,
        caller: &Identity,
        loan_id: &str,
        status: &str,
    ) -> Result<Loan, LoanError> {
        AuthService::require(caller, Role::Admin)?;
        let target: LoanStatus = status.parse().map_err(LoanError::Validation)?;

        let current = self
            .store
            .get_loan_by_id(loan_id)
            .await?
            .ok_or(LoanError::NotFound)?;
        if !current.status.can_transition_to(target) {
            return Err(LoanError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let expected = current.status;
        let updated = current.with_status(target, Utc::now());
        if !self.store.update_loan(&updated, expected).await? {
            let latest = self
                .store
                .get_loan_by_id(loan_id)
                .await?
                .ok_or(LoanError::NotFound)?;
            return Err(LoanError::InvalidTransition {
                from: latest.status,
                to: target,
            });
        }

        info!(loan_id = %loan_id, admin = %caller.username, status = %target, "Loan decided");
        Ok(updated)
    }

    /// Remove a loan. Deleting an unknown id reports `NotFound`.
    pub async fn delete(&self, caller: &Identity, loan_id: &str) -> Result<(), LoanError> {
        AuthService::require(caller, Role::Admin)?;
        if !self.store.delete_loan(loan_id).await? {
            return Err(LoanError::NotFound);
        }
        info!(loan_id = %loan_id, admin = %caller.username, "Loan deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::collections::HashSet;

    fn identity(user_id: &str, role: Role) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            role,
            session_id: "session".to_string(),
        }
    }

    async fn workflow_with(config: LoanConfig) -> LoanWorkflow {
        let pool = crate::db::init_memory().await.unwrap();
        LoanWorkflow::new(Arc::new(SqliteStore::new(pool)), config)
    }

    async fn workflow() -> LoanWorkflow {
        workflow_with(LoanConfig::default()).await
    }

    #[tokio::test]
    async fn test_apply_creates_pending_loan_with_fresh_id() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);

        let mut ids = HashSet::new();
        for amount in [500.0, 1.5, 25_000.0] {
            let loan = engine.apply(&alice, Some(amount)).await.unwrap();
            assert_eq!(loan.status, LoanStatus::Pending);
            assert!(loan.approved_at.is_none());
            assert_eq!(loan.user_id, "alice");
            assert!(ids.insert(loan.id));
        }
    }

    #[tokio::test]
    async fn test_apply_validates_amount() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);

        for amount in [None, Some(0.0), Some(-10.0), Some(f64::NAN), Some(f64::INFINITY)] {
            assert!(matches!(
                engine.apply(&alice, amount).await,
                Err(LoanError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_apply_respects_configured_bounds() {
        let engine = workflow_with(LoanConfig {
            min_amount: Some(100.0),
            max_amount: Some(1000.0),
        })
        .await;
        let alice = identity("alice", Role::User);

        assert!(engine.apply(&alice, Some(99.0)).await.is_err());
        assert!(engine.apply(&alice, Some(1001.0)).await.is_err());
        assert!(engine.apply(&alice, Some(100.0)).await.is_ok());
        assert!(engine.apply(&alice, Some(1000.0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_view_status_ownership() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let bob = identity("bob", Role::User);
        let admin = identity("root", Role::Admin);

        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();

        assert_eq!(engine.view_status(&alice, &loan.id).await.unwrap(), loan);
        assert_eq!(engine.view_status(&admin, &loan.id).await.unwrap(), loan);
        assert!(matches!(
            engine.view_status(&bob, &loan.id).await,
            Err(LoanError::Auth(AuthError::Forbidden(Role::Admin)))
        ));
        assert!(matches!(
            engine.view_status(&alice, "missing").await,
            Err(LoanError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_admin_operations_reject_non_admins() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();

        assert!(matches!(
            engine.view_all(&alice, "all", "asc").await,
            Err(LoanError::Auth(_))
        ));
        assert!(matches!(
            engine.decide(&alice, &loan.id, "approved").await,
            Err(LoanError::Auth(_))
        ));
        assert!(matches!(
            engine.delete(&alice, &loan.id).await,
            Err(LoanError::Auth(_))
        ));

        // Nothing changed
        assert_eq!(
            engine.view_status(&alice, &loan.id).await.unwrap().status,
            LoanStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_approve_scenario() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);

        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);

        let approved = engine.decide(&admin, &loan.id, "approved").await.unwrap();
        assert_eq!(approved.status, LoanStatus::Approved);
        let approved_at = approved.approved_at.unwrap();
        assert!(approved_at >= loan.created_at);

        let viewed = engine.view_status(&alice, &loan.id).await.unwrap();
        assert_eq!(viewed, approved);
    }

    #[tokio::test]
    async fn test_reject_leaves_approved_at_unset() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);

        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();
        let rejected = engine.decide(&admin, &loan.id, "rejected").await.unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert!(rejected.approved_at.is_none());
        assert!(engine
            .view_status(&alice, &loan.id)
            .await
            .unwrap()
            .approved_at
            .is_none());
    }

    #[tokio::test]
    async fn test_decide_rejects_unknown_status_and_bad_transitions() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);
        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();

        assert!(matches!(
            engine.decide(&admin, &loan.id, "cancelled").await,
            Err(LoanError::Validation(_))
        ));
        assert!(matches!(
            engine.decide(&admin, &loan.id, "pending").await,
            Err(LoanError::InvalidTransition {
                from: LoanStatus::Pending,
                to: LoanStatus::Pending
            })
        ));

        engine.decide(&admin, &loan.id, "approved").await.unwrap();
        assert!(matches!(
            engine.decide(&admin, &loan.id, "rejected").await,
            Err(LoanError::InvalidTransition {
                from: LoanStatus::Approved,
                to: LoanStatus::Rejected
            })
        ));
        assert!(matches!(
            engine.decide(&admin, "missing", "approved").await,
            Err(LoanError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_decisions_exactly_one_wins() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);
        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();

        let (approve, reject) = tokio::join!(
            engine.decide(&admin, &loan.id, "approved"),
            engine.decide(&admin, &loan.id, "rejected"),
        );

        let final_loan = engine.view_status(&admin, &loan.id).await.unwrap();
        match (approve, reject) {
            (Ok(won), Err(LoanError::InvalidTransition { from, .. })) => {
                assert_eq!(from, LoanStatus::Approved);
                assert_eq!(final_loan, won);
            }
            (Err(LoanError::InvalidTransition { from, .. }), Ok(won)) => {
                assert_eq!(from, LoanStatus::Rejected);
                assert_eq!(final_loan, won);
                assert!(final_loan.approved_at.is_none());
            }
            other => panic!("expected exactly one decision to win, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_view_all_filters_and_orders() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);

        let mut ids = Vec::new();
        for amount in [100.0, 200.0, 300.0, 400.0] {
            ids.push(engine.apply(&alice, Some(amount)).await.unwrap().id);
        }
        engine.decide(&admin, &ids[0], "approved").await.unwrap();
        engine.decide(&admin, &ids[1], "rejected").await.unwrap();

        let all = engine.view_all(&admin, "all", "asc").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let desc = engine.view_all(&admin, "all", "desc").await.unwrap();
        assert_eq!(desc.len(), 4);
        assert!(desc.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let unknown_order = engine.view_all(&admin, "all", "sideways").await.unwrap();
        assert!(unknown_order
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));

        let pending = engine.view_all(&admin, "pending", "asc").await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|l| l.status == LoanStatus::Pending));

        let approved = engine.view_all(&admin, "approved", "asc").await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, ids[0]);

        assert!(matches!(
            engine.view_all(&admin, "bogus", "asc").await,
            Err(LoanError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_then_view_is_not_found() {
        let engine = workflow().await;
        let alice = identity("alice", Role::User);
        let admin = identity("root", Role::Admin);
        let loan = engine.apply(&alice, Some(500.0)).await.unwrap();

        engine.delete(&admin, &loan.id).await.unwrap();
        assert!(matches!(
            engine.view_status(&admin, &loan.id).await,
            Err(LoanError::NotFound)
        ));
        assert!(matches!(
            engine.delete(&admin, &loan.id).await,
            Err(LoanError::NotFound)
        ));
    }
}
