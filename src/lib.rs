pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod notifications;
pub mod services;
pub mod store;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::notifications::{Mailer, SmtpMailer};
use crate::services::{AccountService, LoanWorkflow};
use crate::store::{AuditStore, SqliteStore};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub auth: Arc<AuthService>,
    pub loans: LoanWorkflow,
    pub accounts: AccountService,
    pub audit: Arc<dyn AuditStore>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let mailer = Arc::new(SmtpMailer::new(config.email.clone()));
        Self::with_mailer(config, db, mailer)
    }

    /// Wire the services around a specific mailer
    pub fn with_mailer(config: Config, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let store = Arc::new(SqliteStore::new(db.clone()));
        let auth = Arc::new(AuthService::new(store.clone(), &config.auth));
        let loans = LoanWorkflow::new(store.clone(), config.loans.clone());
        let accounts = AccountService::new(
            store.clone(),
            auth.clone(),
            mailer,
            config.auth.clone(),
            &config.server.public_url,
        );

        Self {
            config,
            db,
            auth,
            loans,
            accounts,
            audit: store,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
