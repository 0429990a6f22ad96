// paymongo.rs
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

pub const API_BASE_URL: &str = "https://api.paymongo.com";

#[derive(Debug, Clone)]
pub struct PayMongoClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutSession {
    pub id: Option<String>,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    data: Option<CheckoutSessionData>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionData {
    id: Option<String>,
    #[serde(default)]
    attributes: CheckoutSessionAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutSessionAttributes {
    checkout_url: Option<String>,
}

/// Pulls a readable message out of a PayMongo error response.
///
/// PayMongo answers with `{"errors":[{"detail":"..."}]}`; anything else is
/// reported as-is.
pub fn parse_response_error(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(data) => match data["errors"].as_array().and_then(|e| e.first()) {
            Some(first) => first["detail"]
                .as_str()
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| first.to_string()),
            None => data.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

impl PayMongoClient {
    pub fn new(secret_key: &str) -> Result<Self> {
        Self::with_base_url(secret_key, API_BASE_URL)
    }

    pub fn with_base_url(secret_key: &str, base_url: &str) -> Result<Self> {
        // Basic auth: secret key as username, empty password
        let credentials = STANDARD.encode(format!("{}:", secret_key));

        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|_| GatewayError::Provider("secret key is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("paymongo-gateway/0.1"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn build_request_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub async fn create_checkout_session(&self, payload: &Value) -> Result<CheckoutSession> {
        let url = self.build_request_url("v1/checkout_sessions");
        debug!("Creating PayMongo checkout session at {}", url);

        let response = self.client.post(&url).json(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = parse_response_error(&body);
            warn!("PayMongo returned {}: {}", status, message);
            return Err(GatewayError::Provider(message));
        }

        let parsed: CheckoutSessionResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .data
            .map(|data| CheckoutSession {
                id: data.id,
                checkout_url: data.attributes.checkout_url,
            })
            .unwrap_or_default())
    }
}
