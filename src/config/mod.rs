use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub loans: LoanConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL used when building links in outgoing emails
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full SQLite URL. Defaults to `lendr.db` inside the data directory.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing access and action tokens
    #[serde(default)]
    pub jwt_secret: String,
    /// Set when no secret was configured and a random one was generated
    #[serde(skip)]
    pub secret_generated: bool,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_minutes: i64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_minutes: i64,
    /// Lifetime of email verification and password reset links
    #[serde(default = "default_action_token_ttl")]
    pub action_token_ttl_minutes: i64,
    #[serde(default = "default_true")]
    pub require_verification: bool,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
    #[serde(default = "default_password_max_length")]
    pub password_max_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_secret(),
            secret_generated: true,
            access_token_ttl_minutes: default_access_token_ttl(),
            refresh_token_ttl_minutes: default_refresh_token_ttl(),
            action_token_ttl_minutes: default_action_token_ttl(),
            require_verification: true,
            password_min_length: default_password_min_length(),
            password_max_length: default_password_max_length(),
        }
    }
}

/// Random per-process secret. Tokens signed with it do not survive a restart.
fn generate_secret() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

/// Upper bound for every token lifetime (one year)
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

fn default_access_token_ttl() -> i64 {
    120
}

fn default_refresh_token_ttl() -> i64 {
    60 * 24 * 7
}

fn default_action_token_ttl() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_password_min_length() -> usize {
    8
}

fn default_password_max_length() -> usize {
    20
}

/// Optional bounds on requested loan amounts. Both are disabled by default.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoanConfig {
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: true,
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    /// Email is only sent when both the SMTP host and sender address are set
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Lendr".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse configuration file")?;
        if config.auth.jwt_secret.is_empty() {
            config.auth.jwt_secret = generate_secret();
            config.auth.secret_generated = true;
        }
        Ok(config)
    }

    /// Reject settings that would make the service misbehave at runtime.
    /// Called after command line overrides have been applied.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 16 {
            anyhow::bail!("auth.jwt_secret must be at least 16 characters");
        }
        if self.auth.access_token_ttl_minutes <= 0
            || self.auth.refresh_token_ttl_minutes <= 0
            || self.auth.action_token_ttl_minutes <= 0
        {
            anyhow::bail!("auth token lifetimes must be positive");
        }
        if self.auth.access_token_ttl_minutes > MAX_TOKEN_TTL_MINUTES
            || self.auth.refresh_token_ttl_minutes > MAX_TOKEN_TTL_MINUTES
            || self.auth.action_token_ttl_minutes > MAX_TOKEN_TTL_MINUTES
        {
            anyhow::bail!(
                "auth token lifetimes must not exceed {} minutes",
                MAX_TOKEN_TTL_MINUTES
            );
        }
        if self.auth.password_min_length == 0
            || self.auth.password_min_length > self.auth.password_max_length
        {
            anyhow::bail!("auth.password_min_length must be between 1 and password_max_length");
        }
        if let (Some(min), Some(max)) = (self.loans.min_amount, self.loans.max_amount) {
            if min > max {
                anyhow::bail!("loans.min_amount must not exceed loans.max_amount");
            }
        }
        for bound in [self.loans.min_amount, self.loans.max_amount].into_iter().flatten() {
            if !bound.is_finite() || bound <= 0.0 {
                anyhow::bail!("loan amount bounds must be positive numbers");
            }
        }
        Ok(())
    }
}
