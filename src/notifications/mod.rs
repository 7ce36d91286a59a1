//! Outgoing account notifications.

mod email;

pub use email::SmtpMailer;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Email setting '{0}' is not configured")]
    NotConfigured(&'static str),
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends the links that drive the account workflow.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Whether messages actually leave the process.
    fn is_enabled(&self) -> bool;

    async fn send_verification(
        &self,
        to_email: &str,
        username: &str,
        link: &str,
    ) -> Result<(), MailError>;

    async fn send_password_reset(
        &self,
        to_email: &str,
        username: &str,
        link: &str,
    ) -> Result<(), MailError>;
}
