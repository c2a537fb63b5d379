//! API service settings

use anyhow::Result;
use ::config::{Config, Environment};
use serde::Deserialize;

/// Settings read from the process environment (`APP_*`, `MIDTRANS_*`,
/// `S3_*`, `PAYMENT_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_app_url")]
    pub app_url: String,
    pub midtrans_server_key: String,
    #[serde(default)]
    pub midtrans_environment: MidtransEnvironment,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default = "default_boost_price")]
    pub payment_boost_price: i64,
    #[serde(default = "default_challenge_price")]
    pub payment_challenge_price: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidtransEnvironment {
    #[default]
    Sandbox,
    Production,
}

fn default_app_port() -> u16 {
    3001
}

fn default_app_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_boost_price() -> i64 {
    120_000
}

fn default_challenge_price() -> i64 {
    100_000
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;

        if settings.payment_boost_price <= 0 || settings.payment_challenge_price <= 0 {
            anyhow::bail!("Payment prices must be positive");
        }

        Ok(settings)
    }
}
