// webhook.rs
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Paymongo-Signature";

/// Splits `t=..,te=..,li=..` into a map. Tokens without `=` are skipped.
pub fn parse_signature_header(header: &str) -> HashMap<String, String> {
    header
        .split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Checks a PayMongo webhook signature.
///
/// The signed payload is `"{t}.{raw_body}"`. Live events are signed into `li`,
/// test events into `te`; the event's `livemode` flag picks which one is checked.
pub fn verify_signature(
    header: Option<&str>,
    raw_body: &[u8],
    webhook_secret: &str,
    payload: &Value,
) -> bool {
    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return false,
    };
    if webhook_secret.is_empty() {
        return false;
    }

    let parts = parse_signature_header(header);
    let livemode = is_truthy(&payload["data"]["attributes"]["livemode"]);

    let timestamp = match parts.get("t").filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => return false,
    };
    let their_signature = match parts
        .get(if livemode { "li" } else { "te" })
        .filter(|s| !s.is_empty())
    {
        Some(s) => s,
        None => return false,
    };

    let computed_signature = match compute_signature(webhook_secret, timestamp, raw_body) {
        Some(sig) => sig,
        None => return false,
    };

    computed_signature
        .as_bytes()
        .ct_eq(their_signature.as_bytes())
        .into()
}

/// Reads `livemode` the lenient way: `1`, `"true"` or any non-empty value counts
/// as live; `null`, `false`, `0` and empty strings or containers do not.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub fn compute_signature(webhook_secret: &str, timestamp: &str, raw_body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Some(hex::encode(mac.finalize().into_bytes()))
}
