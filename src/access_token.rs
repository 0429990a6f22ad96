// access_token.rs
//! Tokens that bind a return URL to a transaction reference and amount.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn generate(secret: &str, reference: &str, amount: Decimal) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}|{}", reference, amount.normalize()).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn check(secret: &str, token: &str, reference: &str, amount: Decimal) -> bool {
    if secret.is_empty() || token.is_empty() {
        return false;
    }
    match generate(secret, reference, amount) {
        Some(expected) => expected.as_bytes().ct_eq(token.as_bytes()).into(),
        None => false,
    }
}
