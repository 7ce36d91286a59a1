//! Input validation shared by the services and the HTTP handlers.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Something that looks like `local@domain.tld`
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();
}

/// Validate a username. Usernames may not contain `@` so they can never be
/// confused with an email address.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.trim().is_empty() {
        return Err("Username is required".to_string());
    }

    if username.chars().count() > 64 {
        return Err("Username is too long (max 64 characters)".to_string());
    }

    if username.contains('@') {
        return Err("Username must not contain '@'".to_string());
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a password against the configured length bounds
pub fn validate_password(password: &str, min: usize, max: usize) -> Result<(), String> {
    let len = password.chars().count();
    if len < min || len > max {
        return Err(format!(
            "Password must be between {} and {} characters",
            min, max
        ));
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
