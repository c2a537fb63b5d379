//! Auth service settings

use anyhow::Result;
use ::config::{Config, Environment};
use serde::Deserialize;

/// Settings read from the process environment (`APP_PORT`, `SMTP_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from: String,
}

fn default_app_port() -> u16 {
    3000
}

fn default_smtp_port() -> u16 {
    587
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 6] = [
        "APP_PORT",
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_USERNAME",
        "SMTP_PASSWORD",
        "SMTP_FROM",
    ];

    fn clear_env() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        clear_env();
        unsafe {
            env::set_var("SMTP_HOST", "smtp.example.com");
            env::set_var("SMTP_USERNAME", "mailer");
            env::set_var("SMTP_PASSWORD", "hunter2");
            env::set_var("SMTP_FROM", "ElevateU <no-reply@elevateu.dev>");
        }

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.app_port, 3000);
        assert_eq!(settings.smtp_port, 587);
        assert_eq!(settings.smtp_host, "smtp.example.com");
        assert_eq!(settings.smtp_from, "ElevateU <no-reply@elevateu.dev>");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_settings_overrides_and_required() {
        clear_env();
        unsafe {
            env::set_var("APP_PORT", "4000");
            env::set_var("SMTP_PORT", "2525");
            env::set_var("SMTP_HOST", "localhost");
            env::set_var("SMTP_USERNAME", "u");
            env::set_var("SMTP_PASSWORD", "p");
        }

        // SMTP_FROM is missing
        assert!(Settings::from_env().is_err());

        unsafe {
            env::set_var("SMTP_FROM", "no-reply@elevateu.dev");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.app_port, 4000);
        assert_eq!(settings.smtp_port, 2525);

        clear_env();
    }
}
