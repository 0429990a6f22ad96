// reconcile.rs
//! Maps PayMongo webhook events onto transactions.
//!
//! Events arrive as `{data:{attributes:{type, livemode, data:{id, attributes}}}}`.
//! The inner `data` is the checkout session (or payment) the event is about.

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::transaction::{Transaction, TransactionState, Transition};

pub const EVENT_PAYMENT_PAID: &str = "checkout_session.payment.paid";
pub const EVENTS_PAYMENT_FAILED: [&str; 2] = ["payment.failed", "checkout_session.payment.failed"];
pub const PAYMENT_FAILED_MESSAGE: &str = "PayMongo reported a failed payment. Please try again.";
pub const AMOUNT_MISMATCH_MESSAGE: &str = "Paid amount does not match the transaction";

#[derive(Debug, Clone, PartialEq)]
pub struct AmountData {
    pub amount: Decimal,
    pub currency_code: String,
    pub precision_digits: u32,
}

fn event_attributes(payload: &Value) -> &Value {
    &payload["data"]["attributes"]
}

fn resource(payload: &Value) -> &Value {
    &event_attributes(payload)["data"]
}

fn resource_attributes(payload: &Value) -> &Value {
    &resource(payload)["attributes"]
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// Reads an integer that PayMongo may send as a number or a numeric string.
fn as_minor(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn event_type(payload: &Value) -> Option<&str> {
    non_empty_str(&event_attributes(payload)["type"])
}

/// Finds the transaction reference an event points at.
///
/// `reference_number` holds the sanitized reference and may differ from the
/// stored one, so `metadata.odoo_tx_ref` is always preferred.
pub fn extract_reference(payload: &Value) -> Option<String> {
    let attrs = resource_attributes(payload);

    non_empty_str(&attrs["metadata"]["odoo_tx_ref"])
        .or_else(|| non_empty_str(&attrs["reference_number"]))
        .or_else(|| non_empty_str(&attrs["description"]))
        .map(str::to_string)
}

/// Applies an event to a transaction. Safe to call again on redelivery.
///
/// A paid event only settles the transaction when the reported amount and
/// currency match it; otherwise the transaction moves to error.
pub fn apply_update(tx: &mut Transaction, payload: &Value) -> Transition {
    tx.set_provider_reference(non_empty_str(&resource(payload)["id"]));

    match event_type(payload) {
        Some(EVENT_PAYMENT_PAID) => {
            let amount_data = extract_amount(tx, payload);
            match amount_mismatch(tx, &amount_data) {
                Some(message) => {
                    warn!("{} ({})", message, tx.reference());
                    tx.set_error(&message)
                }
                None => tx.set_done(),
            }
        }
        Some(kind) if EVENTS_PAYMENT_FAILED.contains(&kind) => tx.set_error(PAYMENT_FAILED_MESSAGE),
        other => {
            debug!("Event {:?} for {} treated as in-progress", other, tx.reference());
            if tx.state() == TransactionState::Draft {
                tx.set_pending()
            } else {
                Transition::Unchanged
            }
        }
    }
}

/// Compares at the reported precision.
fn amount_mismatch(tx: &Transaction, data: &AmountData) -> Option<String> {
    let rounding = RoundingStrategy::MidpointAwayFromZero;
    let paid = data.amount.round_dp_with_strategy(data.precision_digits, rounding);
    let expected = tx.amount.round_dp_with_strategy(data.precision_digits, rounding);

    if paid == expected && data.currency_code.eq_ignore_ascii_case(&tx.currency.code) {
        return None;
    }
    Some(format!(
        "{}: expected {} {}, PayMongo reported {} {}.",
        AMOUNT_MISMATCH_MESSAGE, expected, tx.currency.code, paid, data.currency_code
    ))
}

/// Extracts the paid amount in major units, trying the most reliable source first.
///
/// A source whose numbers do not fit is skipped.
pub fn extract_amount(tx: &Transaction, payload: &Value) -> AmountData {
    let attrs = resource_attributes(payload);
    let currency = &tx.currency;
    let from_minor = |minor: i64, code: Option<&str>| {
        currency.from_minor_units(minor).map(|amount| AmountData {
            amount,
            currency_code: code.unwrap_or(currency.code.as_str()).to_string(),
            precision_digits: currency.decimal_places,
        })
    };

    let from_payment = || -> Option<AmountData> {
        let pay_attrs = &attrs["payments"].as_array()?.first()?["attributes"];
        from_minor(as_minor(&pay_attrs["amount"])?, non_empty_str(&pay_attrs["currency"]))
    };

    let from_intent = || -> Option<AmountData> {
        let intent_attrs = &attrs["payment_intent"]["attributes"];
        from_minor(as_minor(&intent_attrs["amount"])?, non_empty_str(&intent_attrs["currency"]))
    };

    let from_line_items = || -> Option<AmountData> {
        let items = attrs["line_items"].as_array().filter(|i| !i.is_empty())?;
        let mut total_minor = 0_i64;
        let mut code: Option<&str> = None;
        for item in items {
            let quantity = as_minor(&item["quantity"]).filter(|q| *q != 0).unwrap_or(1);
            let amount = as_minor(&item["amount"]).unwrap_or(0);
            match quantity
                .checked_mul(amount)
                .and_then(|line_total| total_minor.checked_add(line_total))
            {
                Some(total) => total_minor = total,
                None => {
                    warn!("Line item total overflows for {}, ignoring line items", tx.reference());
                    return None;
                }
            }
            code = non_empty_str(&item["currency"]).or(code);
        }
        from_minor(total_minor, code)
    };

    from_payment()
        .or_else(from_intent)
        .or_else(from_line_items)
        .unwrap_or_else(|| AmountData {
            amount: tx.amount,
            currency_code: currency.code.clone(),
            precision_digits: currency.decimal_places,
        })
}
