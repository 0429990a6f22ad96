// routes.rs
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::checkout::{RETURN_PATH, WEBHOOK_PATH};
use crate::error::{GatewayError, Result};
use crate::provider::{PaymentProviderStrategy, ProviderRegistry, PAYMONGO};
use crate::store::TransactionStore;
use crate::transaction::{Currency, OrderLine, Partner, Transaction, TransactionState};
use crate::webhook::SIGNATURE_HEADER;

pub const STATUS_PAGE: &str = "/payment/status";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub providers: ProviderRegistry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .route(RETURN_PATH, get(handle_return))
        .route("/payment/transactions", post(create_transaction))
        .route(
            "/payment/transactions/:reference/checkout",
            post(start_checkout),
        )
        .route("/health", get(health_check))
        .with_state(Arc::new(state))
}

fn accepted() -> Json<Value> {
    Json(json!(["accepted"]))
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<Value>, StatusCode> {
    let provider = state
        .providers
        .get(PAYMONGO)
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Ignoring PayMongo notification with unparseable body: {}", e);
            return Ok(accepted());
        }
    };
    info!("Notification received from PayMongo with data: {}", payload);

    let reference = match provider.extract_reference(&payload) {
        Some(reference) => reference,
        None => {
            warn!("No transaction reference found in PayMongo notification");
            return Ok(accepted());
        }
    };

    let tx = match state.store.get(&reference).await {
        Ok(Some(tx)) if tx.provider_code == provider.code() => tx,
        Ok(_) => {
            warn!("No PayMongo transaction found matching reference {}", reference);
            return Ok(accepted());
        }
        Err(e) => {
            error!("Failed to look up transaction {}: {}", reference, e);
            return Ok(accepted());
        }
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    if !provider.verify_notification(signature, &body, &payload) {
        warn!("Received PayMongo webhook with invalid signature.");
        return Err(StatusCode::FORBIDDEN);
    }

    if let Err(e) = process_notification(&state, provider, tx.reference(), payload).await {
        error!("Error processing PayMongo notification for {}: {}", reference, e);
    }

    Ok(accepted())
}

async fn process_notification(
    state: &AppState,
    provider: Arc<dyn PaymentProviderStrategy>,
    reference: &str,
    payload: Value,
) -> Result<()> {
    let updated = state
        .store
        .update(
            reference,
            Box::new(move |tx: &mut Transaction| {
                let outcome = provider.apply_update(tx, &payload);
                info!("Notification applied to {}: {:?}", tx.reference(), outcome);
            }),
        )
        .await?;

    if let Some(tx) = updated {
        info!("Transaction {} is now {}", tx.reference(), tx.state().as_str());
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    tx_ref: Option<String>,
    access_token: Option<String>,
    result: Option<String>,
}

/// Buyer is back from the hosted checkout. The webhook confirms the final
/// state; this only marks a draft transaction as pending.
async fn handle_return(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReturnParams>,
) -> Redirect {
    if let Err(e) = mark_returned(&state, &params).await {
        error!("Failed to process PayMongo return for {:?}: {}", params.tx_ref, e);
    }
    Redirect::to(STATUS_PAGE)
}

async fn mark_returned(state: &AppState, params: &ReturnParams) -> Result<()> {
    let (reference, token) = match (&params.tx_ref, &params.access_token) {
        (Some(reference), Some(token)) if !token.is_empty() => (reference, token),
        _ => return Ok(()),
    };
    info!(
        "Buyer returned from PayMongo for {} with result {:?}",
        reference, params.result
    );

    let provider = state.providers.get(PAYMONGO)?;
    let tx = match state.store.get(reference).await? {
        Some(tx) if tx.provider_code == provider.code() && tx.state() == TransactionState::Draft => tx,
        _ => return Ok(()),
    };

    if !provider.check_access_token(token, reference, tx.amount) {
        warn!("Invalid access token on PayMongo return for {}", reference);
        return Ok(());
    }

    state
        .store
        .update(
            reference,
            Box::new(|tx: &mut Transaction| {
                if tx.state() == TransactionState::Draft {
                    tx.set_pending();
                }
            }),
        )
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct NewTransaction {
    pub reference: String,
    #[serde(default = "default_provider")]
    pub provider_code: String,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub partner: Partner,
    #[serde(default)]
    pub invoice_lines: Vec<OrderLine>,
    #[serde(default)]
    pub sale_order_lines: Vec<OrderLine>,
}

fn default_provider() -> String {
    PAYMONGO.to_string()
}

async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(new_tx): Json<NewTransaction>,
) -> std::result::Result<(StatusCode, Json<Transaction>), StatusCode> {
    state
        .providers
        .get(&new_tx.provider_code)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let amount_check = new_tx
        .currency
        .validate()
        .and_then(|_| new_tx.currency.to_minor_units(new_tx.amount));
    if let Err(e) = amount_check {
        warn!("Rejecting transaction {}: {}", new_tx.reference, e);
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let store_error =|e: GatewayError| {
        error!("Failed to store transaction: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    if state
        .store
        .get(&new_tx.reference)
        .await
        .map_err(store_error)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    let mut tx = Transaction::new(
        &new_tx.reference,
        &new_tx.provider_code,
        new_tx.amount,
        new_tx.currency,
    );
    tx.partner = new_tx.partner;
    tx.invoice_lines = new_tx.invoice_lines;
    tx.sale_order_lines = new_tx.sale_order_lines;

    state.store.insert(&tx).await.map_err(store_error)?;
    info!("Transaction {} created for {}", tx.reference(), tx.provider_code);

    Ok((StatusCode::CREATED, Json(tx)))
}

/// Opens a hosted checkout for a transaction. Provider failures come back as an
/// error state on the transaction, not as an HTTP error.
async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let mut tx = match state.store.get(&reference).await {
        Ok(Some(tx)) => tx,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to look up transaction {}: {}", reference, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    if tx.state() != TransactionState::Draft {
        return Err(StatusCode::CONFLICT);
    }

    let provider = state
        .providers
        .get(&tx.provider_code)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let api_url = provider.create_checkout(&mut tx).await;

    let provider_reference = tx.provider_reference.clone();
    let failure = match tx.state() {
        TransactionState::Error => tx.state_message.clone(),
        _ => None,
    };
    let updated = state
        .store
        .update(
            &reference,
            Box::new(move |stored: &mut Transaction| {
                stored.set_provider_reference(provider_reference.as_deref());
                if let Some(message) = failure {
                    stored.set_error(&message);
                }
            }),
        )
        .await
        .map_err(|e| {
            error!("Failed to store checkout result for {}: {}", reference, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(json!({
        "reference": updated.reference(),
        "state": updated.state(),
        "state_message": updated.state_message,
        "provider_reference": updated.provider_reference,
        "api_url": api_url,
    })))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now()
    }))
}
