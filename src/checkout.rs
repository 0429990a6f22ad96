// checkout.rs
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::access_token;
use crate::error::{GatewayError, Result};
use crate::transaction::{OrderLine, Transaction};

pub const RETURN_PATH: &str = "/payment/paymongo/return";
pub const WEBHOOK_PATH: &str = "/payment/paymongo/webhook";
pub const PAYMENT_METHOD_QRPH: &str = "qrph";
pub const SUPPORTED_CURRENCY: &str = "PHP";

const MAX_REFERENCE_LEN: usize = 60;
const MAX_ITEM_TEXT_LEN: usize = 255;

static DISALLOWED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());
static REPEATED_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

/// Turns an internal reference into a PayMongo `reference_number`, which only
/// accepts `[A-Za-z0-9_-]`.
pub fn sanitize_reference(reference: &str) -> String {
    let replaced = DISALLOWED_CHARS.replace_all(reference.trim(), "-");
    let collapsed = REPEATED_DASHES.replace_all(&replaced, "-");
    let sanitized: String = collapsed
        .trim_matches('-')
        .chars()
        .take(MAX_REFERENCE_LEN)
        .collect();

    if sanitized.is_empty() {
        "odoo".to_string()
    } else {
        sanitized
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ITEM_TEXT_LEN).collect()
}

fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates.iter().flatten().copied().find(|s| !s.is_empty())
}

fn line_item(tx: &Transaction, line: &OrderLine) -> Result<Value> {
    let qty = if line.quantity.is_zero() {
        Decimal::ONE
    } else {
        line.quantity
    };

    // PayMongo only takes whole quantities; fractional ones are billed as a single unit.
    let (quantity, amount_minor) = if qty.fract().is_zero() {
        let unit_total = line
            .price_unit
            .checked_mul(Decimal::ONE - line.discount / Decimal::ONE_HUNDRED)
            .ok_or_else(|| GatewayError::AmountOutOfRange(line.price_unit.to_string()))?;
        (
            i64::try_from(qty).unwrap_or(1),
            tx.currency.to_minor_units(unit_total)?,
        )
    } else {
        (1, tx.currency.to_minor_units(line.price_subtotal)?)
    };

    let name = first_non_empty(&[line.name.as_deref(), line.product_name.as_deref()]).unwrap_or("Item");
    let description =
        first_non_empty(&[line.product_name.as_deref(), line.name.as_deref()]).unwrap_or("");

    Ok(json!({
        "name": truncate(name),
        "quantity": quantity.max(1),
        "amount": amount_minor.max(0),
        "currency": SUPPORTED_CURRENCY,
        "description": truncate(description),
    }))
}

/// Builds checkout line items from invoice lines, else sale order lines, else
/// a single item for the whole transaction.
pub fn build_line_items(tx: &Transaction) -> Result<Vec<Value>> {
    if tx.currency.code != SUPPORTED_CURRENCY {
        return Err(GatewayError::UnsupportedCurrency(tx.currency.code.clone()));
    }
    tx.currency.validate()?;

    let lines = if !tx.invoice_lines.is_empty() {
        &tx.invoice_lines
    } else {
        &tx.sale_order_lines
    };

    let mut items: Vec<Value> = lines
        .iter()
        .filter(|line| line.display_type.is_none())
        .map(|line| line_item(tx, line))
        .collect::<Result<_>>()?;

    if items.is_empty() {
        items.push(json!({
            "name": "eLGU Payment",
            "quantity": 1,
            "amount": tx.currency.to_minor_units(tx.amount)?,
            "currency": SUPPORTED_CURRENCY,
            "description": tx.reference(),
        }));
    }

    Ok(items)
}

/// Builds the `POST /v1/checkout_sessions` body for a transaction.
pub fn build_checkout_payload(
    tx: &Transaction,
    base_url: &str,
    access_token_secret: &str,
) -> Result<Value> {
    let line_items = build_line_items(tx)?;
    let reference = tx.reference();
    let san_ref = sanitize_reference(reference);

    let return_url = format!("{}{}", base_url.trim_end_matches('/'), RETURN_PATH);
    let token = access_token::generate(access_token_secret, reference, tx.amount)
        .unwrap_or_default();
    let redirect = |result: &str| -> Result<String> {
        Url::parse_with_params(
            &return_url,
            &[("tx_ref", reference), ("access_token", token.as_str()), ("result", result)],
        )
        .map(String::from)
        .map_err(|e| GatewayError::InvalidBaseUrl(format!("{}: {}", base_url, e)))
    };

    let partner = &tx.partner;
    let email = partner.email.as_deref().filter(|e| !e.is_empty());
    let phone = partner.phone.as_deref().filter(|p| !p.is_empty());

    let mut billing = Map::new();
    billing.insert("name".into(), json!(partner.name.as_deref().unwrap_or("")));
    if let Some(email) = email {
        billing.insert("email".into(), json!(email));
    }
    if let Some(phone) = phone {
        billing.insert("phone".into(), json!(phone));
    }
    billing.insert(
        "address".into(),
        json!({
            "line1": partner.address.as_deref().unwrap_or(""),
            "city": partner.city.as_deref().unwrap_or(""),
            "postal_code": partner.zip.as_deref().unwrap_or(""),
            "country": "PH",
            "state": partner.state.as_deref().unwrap_or(""),
        }),
    );

    let partner_id = partner.id.map(|id| id.to_string()).unwrap_or_default();

    Ok(json!({
        "data": {
            "attributes": {
                "payment_method_types": [PAYMENT_METHOD_QRPH],
                "line_items": line_items,
                "reference_number": san_ref,
                "description": reference,
                "metadata": {
                    "odoo_tx_ref": reference,
                    "paymongo_ref": san_ref,
                    "odoo_partner_id": partner_id,
                },
                "success_url": redirect("success")?,
                "cancel_url": redirect("cancel")?,
                "show_description": true,
                "show_line_items": true,
                "send_email_receipt": email.is_some(),
                "billing": Value::Object(billing),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Currency;
    use rust_decimal_macros::dec;

    fn tx() -> Transaction {
        Transaction::new("INV/2024/0001", "paymongo", dec!(250.00), Currency::php())
    }

    #[test]
    fn test_sanitize_reference() {
        assert_eq!(sanitize_reference("Order #123/ABC"), "Order-123-ABC");
        assert_eq!(sanitize_reference(""), "odoo");
        assert_eq!(sanitize_reference("  //  "), "odoo");
        assert_eq!(sanitize_reference("--a--b--"), "a-b");
        assert_eq!(sanitize_reference(&"x".repeat(70)).len(), 60);
    }

    #[test]
    fn test_invoice_line_with_integer_quantity() {
        let mut tx = tx();
        tx.invoice_lines.push(OrderLine {
            name: Some("Business permit".into()),
            quantity: dec!(2),
            price_unit: dec!(125.00),
            price_subtotal: dec!(250.00),
            ..Default::default()
        });

        let items = build_line_items(&tx).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["quantity"], 2);
        assert_eq!(items[0]["amount"], 12500);
        assert_eq!(items[0]["currency"], "PHP");
        assert_eq!(items[0]["name"], "Business permit");
    }

    #[test]
    fn test_fractional_quantity_flattens_and_discount_applies() {
        let mut tx = tx();
        tx.sale_order_lines.push(OrderLine {
            product_name: Some("Water".into()),
            quantity: dec!(1.5),
            price_unit: dec!(10.00),
            price_subtotal: dec!(15.00),
            ..Default::default()
        });
        tx.sale_order_lines.push(OrderLine {
            name: Some("Section".into()),
            display_type: Some("line_section".into()),
            ..Default::default()
        });
        tx.sale_order_lines.push(OrderLine {
            quantity: dec!(3),
            price_unit: dec!(100.00),
            discount: dec!(10),
            price_subtotal: dec!(270.00),
            ..Default::default()
        });

        let items = build_line_items(&tx).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["quantity"], 1);
        assert_eq!(items[0]["amount"], 1500);
        assert_eq!(items[0]["name"], "Water");
        assert_eq!(items[1]["quantity"], 3);
        assert_eq!(items[1]["amount"], 9000);
        assert_eq!(items[1]["name"], "Item");
    }

    #[test]
    fn test_invoices_preferred_and_fallback_item() {
        let mut tx = tx();
        tx.sale_order_lines.push(OrderLine {
            name: Some("from order".into()),
            quantity: dec!(1),
            price_unit: dec!(1.00),
            ..Default::default()
        });
        tx.invoice_lines.push(OrderLine {
            name: Some("from invoice".into()),
            quantity: dec!(1),
            price_unit: dec!(2.00),
            ..Default::default()
        });
        let items = build_line_items(&tx).unwrap();
        assert_eq!(items[0]["name"], "from invoice");

        let bare = Transaction::new("INV/2024/0001", "paymongo", dec!(250.00), Currency::php());
        let items = build_line_items(&bare).unwrap();
        assert_eq!(items[0]["name"], "eLGU Payment");
        assert_eq!(items[0]["amount"], 25000);
        assert_eq!(items[0]["description"], "INV/2024/0001");
    }

    #[test]
    fn test_non_php_currency_rejected() {
        let tx = Transaction::new("S1", "paymongo", dec!(10), Currency::new("USD", 2));
        assert!(matches!(
            build_line_items(&tx),
            Err(GatewayError::UnsupportedCurrency(code)) if code == "USD"
        ));
    }

    #[test]
    fn test_too_many_decimals_is_an_error() {
        let tx = Transaction::new("S1", "paymongo", dec!(1), Currency::new("PHP", 30));
        assert!(matches!(
            build_line_items(&tx),
            Err(GatewayError::InvalidCurrency(_))
        ));

        let mut tx = Transaction::new("S1", "paymongo", dec!(1), Currency::php());
        tx.invoice_lines.push(OrderLine {
            quantity: dec!(1),
            price_unit: Decimal::MAX,
            ..Default::default()
        });
        assert!(matches!(
            build_line_items(&tx),
            Err(GatewayError::AmountOutOfRange(_))
        ));
    }

    #[test]
    fn test_payload_omits_empty_contact_fields() {
        let mut tx = tx();
        tx.partner.name = Some("Juan".into());
        tx.partner.phone = Some(String::new());

        let payload = build_checkout_payload(&tx, "https://shop.example/", "secret").unwrap();
        let attrs = &payload["data"]["attributes"];
        assert_eq!(attrs["send_email_receipt"], false);
        assert!(attrs["billing"].get("email").is_none());
        assert!(attrs["billing"].get("phone").is_none());
        assert_eq!(attrs["billing"]["address"]["country"], "PH");
        assert_eq!(attrs["reference_number"], "INV-2024-0001");
        assert_eq!(attrs["metadata"]["odoo_tx_ref"], "INV/2024/0001");
        assert_eq!(attrs["payment_method_types"][0], "qrph");

        let success_url = attrs["success_url"].as_str().unwrap();
        assert!(success_url
            .starts_with("https://shop.example/payment/paymongo/return?tx_ref=INV%2F2024%2F0001&"));
        assert!(success_url.ends_with("&result=success"));
    }

    #[test]
    fn test_payload_with_email_sends_receipt() {
        let mut tx = tx();
        tx.partner.email = Some("juan@example.ph".into());
        let payload = build_checkout_payload(&tx, "https://shop.example", "secret").unwrap();
        let attrs = &payload["data"]["attributes"];
        assert_eq!(attrs["send_email_receipt"], true);
        assert_eq!(attrs["billing"]["email"], "juan@example.ph");
    }
}
