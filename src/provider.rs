// provider.rs
//! Provider-specific behavior behind a common trait, looked up by provider code.

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::access_token;
use crate::checkout::{self, PAYMENT_METHOD_QRPH, SUPPORTED_CURRENCY};
use crate::error::{GatewayError, Result};
use crate::paymongo::PayMongoClient;
use crate::reconcile::{self, AmountData};
use crate::transaction::{Transaction, Transition};
use crate::webhook;

pub const PAYMONGO: &str = "paymongo";

#[async_trait]
pub trait PaymentProviderStrategy: Send + Sync {
    fn code(&self) -> &str;

    fn supported_currencies(&self) -> &[&str];

    fn default_payment_method_codes(&self) -> &[&str];

    /// Authenticates an inbound notification. A `false` must reject it.
    fn verify_notification(&self, signature: Option<&str>, raw_body: &[u8], payload: &Value)
        -> bool;

    fn check_access_token(&self, token: &str, reference: &str, amount: Decimal) -> bool;

    fn extract_reference(&self, payload: &Value) -> Option<String>;

    fn apply_update(&self, tx: &mut Transaction, payload: &Value) -> Transition;

    fn extract_amount(&self, tx: &Transaction, payload: &Value) -> AmountData;

    /// Opens a hosted checkout and returns the URL to redirect the buyer to.
    ///
    /// Failures are recorded on the transaction, which moves to error.
    async fn create_checkout(&self, tx: &mut Transaction) -> Option<String>;
}

pub struct PayMongoProvider {
    client: PayMongoClient,
    webhook_secret: SecretString,
    access_token_secret: SecretString,
    base_url: String,
}

impl PayMongoProvider {
    pub fn new(
        client: PayMongoClient,
        webhook_secret: SecretString,
        access_token_secret: SecretString,
        base_url: &str,
    ) -> Self {
        Self {
            client,
            webhook_secret,
            access_token_secret,
            base_url: base_url.to_string(),
        }
    }

    async fn open_checkout_session(&self, tx: &mut Transaction) -> Result<String> {
        let payload = checkout::build_checkout_payload(
            tx,
            &self.base_url,
            self.access_token_secret.expose_secret(),
        )?;
        let session = self.client.create_checkout_session(&payload).await?;

        tx.set_provider_reference(session.id.as_deref());

        session
            .checkout_url
            .filter(|url| !url.is_empty())
            .ok_or(GatewayError::MissingCheckoutUrl)
    }
}

#[async_trait]
impl PaymentProviderStrategy for PayMongoProvider {
    fn code(&self) -> &str {
        PAYMONGO
    }

    fn supported_currencies(&self) -> &[&str] {
        &[SUPPORTED_CURRENCY]
    }

    fn default_payment_method_codes(&self) -> &[&str] {
        &[PAYMENT_METHOD_QRPH]
    }

    fn verify_notification(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
        payload: &Value,
    ) -> bool {
        webhook::verify_signature(
            signature,
            raw_body,
            self.webhook_secret.expose_secret(),
            payload,
        )
    }

    fn check_access_token(&self, token: &str, reference: &str, amount: Decimal) -> bool {
        access_token::check(
            self.access_token_secret.expose_secret(),
            token,
            reference,
            amount,
        )
    }

    fn extract_reference(&self, payload: &Value) -> Option<String> {
        reconcile::extract_reference(payload)
    }

    fn apply_update(&self, tx: &mut Transaction, payload: &Value) -> Transition {
        reconcile::apply_update(tx, payload)
    }

    fn extract_amount(&self, tx: &Transaction, payload: &Value) -> AmountData {
        reconcile::extract_amount(tx, payload)
    }

    async fn create_checkout(&self, tx: &mut Transaction) -> Option<String> {
        match self.open_checkout_session(tx).await {
            Ok(url) => {
                info!("Checkout session {:?} opened for {}", tx.provider_reference, tx.reference());
                Some(url)
            }
            Err(e) => {
                error!("Checkout for {} failed: {}", tx.reference(), e);
                tx.set_error(&e.to_string());
                None
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn PaymentProviderStrategy>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProviderStrategy>) {
        self.providers.insert(provider.code().to_string(), provider);
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn PaymentProviderStrategy>> {
        self.providers
            .get(code)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider(code.to_string()))
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}
