//! Command-line interface.
//!
//! With no subcommand the binary starts the server. `config check` validates
//! the configuration file and prints a summary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "lendr")]
#[command(author, version, about = "Loan management API server", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "LENDR_CONFIG", default_value = "lendr.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Token signing secret, overrides `auth.jwt_secret`
    #[arg(long, env = "LENDR_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

impl Cli {
    /// Load the configuration file, apply command line overrides and validate
    /// the result.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(secret) = &self.jwt_secret {
            config.auth.jwt_secret = secret.clone();
            config.auth.secret_generated = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        // No subcommand means start the server - this is handled in main.rs
        None => Ok(()),
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    match cli.load_config() {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Server:");
            println!("  Address:      {}:{}", config.server.host, config.server.port);
            println!("  Data Dir:     {}", config.server.data_dir.display());
            println!("  Public URL:   {}", config.server.public_url);
            println!();
            println!("Auth:");
            println!(
                "  Secret:       {}",
                if config.auth.secret_generated {
                    "random per process (set auth.jwt_secret)"
                } else {
                    "configured"
                }
            );
            println!(
                "  Access TTL:   {} minutes",
                config.auth.access_token_ttl_minutes
            );
            println!(
                "  Refresh TTL:  {} minutes",
                config.auth.refresh_token_ttl_minutes
            );
            println!(
                "  Verification: {}",
                enabled(config.auth.require_verification)
            );
            println!(
                "  Password:     {}-{} characters",
                config.auth.password_min_length, config.auth.password_max_length
            );
            println!();
            println!("Loans:");
            println!(
                "  Min Amount:   {}",
                config
                    .loans
                    .min_amount
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            println!(
                "  Max Amount:   {}",
                config
                    .loans
                    .max_amount
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            println!();
            println!("Email:          {}", enabled(config.email.is_configured()));
            println!("Log Level:      {}", config.logging.level);
            Ok(())
        }
        Err(e) => {
            println!("[FAIL] Configuration is invalid:");
            println!();
            println!("  {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_defaults() {
        let cli = Cli::try_parse_from(["lendr"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("lendr.toml"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["lendr", "-c", "custom.toml", "config", "check"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Some(Commands::Config(ConfigCommands::Check))
        ));
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let cli = Cli::try_parse_from([
            "lendr",
            "--config",
            "/nonexistent/lendr.toml",
            "--log-level",
            "debug",
            "--jwt-secret",
            "a-secret-from-the-command-line",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.auth.jwt_secret, "a-secret-from-the-command-line");
        assert!(!config.auth.secret_generated);
    }

    #[test]
    fn test_short_override_secret_rejected() {
        let cli = Cli::try_parse_from([
            "lendr",
            "--config",
            "/nonexistent/lendr.toml",
            "--jwt-secret",
            "short",
        ])
        .unwrap();
        assert!(cli.load_config().is_err());
    }
}
