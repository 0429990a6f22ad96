// config.rs
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Service configuration, read from `PAYMONGO_GATEWAY_*` environment variables.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// PayMongo API secret key (`sk_test_...` / `sk_live_...`).
    pub secret_key: SecretString,
    /// Signing secret of the registered webhook.
    pub webhook_secret: SecretString,
    /// Key for return-URL access tokens.
    pub access_token_secret: SecretString,
    /// Transactions are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public URL PayMongo redirects buyers back to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PAYMONGO_GATEWAY"))
            .build()?
            .try_deserialize()
            .context("failed to read PAYMONGO_GATEWAY_* settings")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_key.expose_secret().is_empty() {
            anyhow::bail!("PAYMONGO_GATEWAY_SECRET_KEY not set");
        }
        if self.webhook_secret.expose_secret().is_empty() {
            anyhow::bail!("PAYMONGO_GATEWAY_WEBHOOK_SECRET not set");
        }
        if self.access_token_secret.expose_secret().is_empty() {
            anyhow::bail!("PAYMONGO_GATEWAY_ACCESS_TOKEN_SECRET not set");
        }
        Ok(())
    }

    pub fn is_live_mode(&self) -> bool {
        self.secret_key.expose_secret().starts_with("sk_live_")
    }
}
