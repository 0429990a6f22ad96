// error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("PayMongo Checkout (QRPH) currently supports PHP only, got {0}.")]
    UnsupportedCurrency(String),
    #[error("PayMongo did not return a checkout_url.")]
    MissingCheckoutUrl,
    #[error("PayMongo request failed: {0}")]
    Provider(String),
    #[error("Amount {0} does not fit in minor units.")]
    AmountOutOfRange(String),
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
    #[error("Invalid base URL {0}")]
    InvalidBaseUrl(String),
    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
