//! SMTP delivery of account emails (verification and password reset links).

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{MailError, Mailer};
use crate::config::EmailConfig;

/// Mailer backed by the `[email]` SMTP settings
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: String,
        text_body: String,
    ) -> Result<(), MailError> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or(MailError::NotConfigured("smtp_host"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or(MailError::NotConfigured("from_address"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    async fn send_verification(
        &self,
        to_email: &str,
        username: &str,
        link: &str,
    ) -> Result<(), MailError> {
        if !self.is_enabled() {
            tracing::warn!("Email not configured, skipping verification email to {}", to_email);
            return Ok(());
        }
        let message = render_message(
            "Confirm your email",
            username,
            "Thanks for signing up. Confirm your email address to activate your account.",
            "Activate account",
            link,
        );
        self.send_email(to_email, "Activate your Lendr account", message.html, message.text)
            .await
    }

    async fn send_password_reset(
        &self,
        to_email: &str,
        username: &str,
        link: &str,
    ) -> Result<(), MailError> {
        if !self.is_enabled() {
            tracing::warn!("Email not configured, skipping password reset email to {}", to_email);
            return Ok(());
        }
        let message = render_message(
            "Reset your password",
            username,
            "We received a request to reset your password. If this was not you, ignore this email.",
            "Choose a new password",
            link,
        );
        self.send_email(to_email, "Reset your Lendr password", message.html, message.text)
            .await
    }
}

struct RenderedMessage {
    html: String,
    text: String,
}

fn render_message(
    title: &str,
    username: &str,
    intro: &str,
    action: &str,
    link: &str,
) -> RenderedMessage {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; background-color: #f5f5f5; }}
        .card {{ max-width: 520px; margin: 40px auto; background: #ffffff; border-radius: 8px; padding: 32px 24px; }}
        .button {{ display: inline-block; background: #2563eb; color: white !important; text-decoration: none; padding: 12px 28px; border-radius: 6px; }}
        .note {{ color: #6b7280; font-size: 13px; }}
    </style>
</head>
<body>
    <div class="card">
        <h1>{title}</h1>
        <p>Hi {username},</p>
        <p>{intro}</p>
        <p><a class="button" href="{link}">{action}</a></p>
        <p class="note">Or paste this link into your browser: {link}</p>
    </div>
</body>
</html>"#
    );

    let text = format!("{title}\n\nHi {username},\n\n{intro}\n\n{action}: {link}\n");

    RenderedMessage { html, text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_message_contains_link() {
        let message = render_message(
            "Reset your password",
            "alice",
            "intro",
            "Reset",
            "http://localhost/reset?token=abc",
        );
        assert!(message.html.contains("href=\"http://localhost/reset?token=abc\""));
        assert!(message.html.contains("Hi alice"));
        assert!(message.text.contains("Reset: http://localhost/reset?token=abc"));
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_skips_sending() {
        let mailer = SmtpMailer::new(EmailConfig::default());
        assert!(!mailer.is_enabled());
        mailer
            .send_verification("alice@example.com", "alice", "http://localhost/verify/x")
            .await
            .unwrap();
    }
}
