//! Input validation utilities
//!
//! Each validator returns the offending field so handlers can gather several
//! failures into a single [`AppError::Validation`].

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{AppError, FieldError};

/// Collects field failures across several checks
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, result: Result<(), FieldError>) -> &mut Self {
        if let Err(e) = result {
            self.errors.push(e);
        }
        self
    }

    pub fn finish(&mut self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    })
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), FieldError> {
    if email.is_empty() {
        return Err(FieldError::new("email", "Email is required"));
    }

    if email.len() > 254 {
        return Err(FieldError::new(
            "email",
            "Email must be at most 254 characters long",
        ));
    }

    if !email_regex().is_match(email) {
        return Err(FieldError::new("email", "Invalid email format"));
    }

    Ok(())
}

/// Validate password. bcrypt only reads the first 72 bytes, hence the cap.
pub fn validate_password(password: &str) -> Result<(), FieldError> {
    if password.len() < 8 {
        return Err(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
    }

    if password.len() > 72 {
        return Err(FieldError::new(
            "password",
            "Password must be at most 72 bytes long",
        ));
    }

    Ok(())
}

/// Validate display name
pub fn validate_name(name: &str) -> Result<(), FieldError> {
    let length = name.trim().chars().count();

    if length == 0 {
        return Err(FieldError::new("name", "Name is required"));
    }

    if length > 100 {
        return Err(FieldError::new(
            "name",
            "Name must be at most 100 characters long",
        ));
    }

    Ok(())
}

/// Validate a one-time password: exactly six ASCII digits
pub fn validate_otp(otp: &str) -> Result<(), FieldError> {
    if otp.len() != 6 || !otp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::new("otp", "OTP must be exactly 6 digits"));
    }

    Ok(())
}

/// Validate the length of a free-text field in characters
pub fn validate_length(
    field: &str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), FieldError> {
    let length = value.chars().count();
    if length < min || length > max {
        return Err(FieldError::new(
            field,
            format!("{field} must be between {min} and {max} characters long"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name+tag@example.co.uk").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid-email").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("test@").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password1").is_ok());
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"a".repeat(72)).is_ok());
        assert_eq!(
            validate_password(&"a".repeat(73)).unwrap_err().field,
            "password"
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"é".repeat(100)).is_ok());
        assert!(validate_name(&"é".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_otp() {
        assert!(validate_otp("012345").is_ok());
        assert!(validate_otp("12345").is_err());
        assert!(validate_otp("1234567").is_err());
        assert!(validate_otp("12a456").is_err());
        assert!(validate_otp("１２３４５６").is_err());
    }

    #[test]
    fn validator_collects_every_failure() {
        let err = Validator::new()
            .check(validate_email("nope"))
            .check(validate_password("short"))
            .check(validate_name("Ada"))
            .finish()
            .unwrap_err();

        match err {
            AppError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "password"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
