// transaction.rs
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};

/// Most decimals a currency may declare; 10^18 is the largest power of ten in an `i64`.
pub const MAX_DECIMAL_PLACES: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Draft,
    Pending,
    Done,
    Error,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Draft => "draft",
            TransactionState::Pending => "pending",
            TransactionState::Done => "done",
            TransactionState::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(TransactionState::Draft),
            "pending" => Some(TransactionState::Pending),
            "done" => Some(TransactionState::Done),
            "error" => Some(TransactionState::Error),
            _ => None,
        }
    }
}

/// Outcome of a requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Already in the requested state.
    Unchanged,
    /// The transaction is terminal in another state.
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
}

fn default_decimal_places() -> u32 {
    2
}

impl Currency {
    pub fn new(code: &str, decimal_places: u32) -> Self {
        Self {
            code: code.to_string(),
            decimal_places,
        }
    }

    pub fn php() -> Self {
        Self::new("PHP", 2)
    }

    /// Digits used for minor units. A currency without configured decimals counts as 2.
    pub fn minor_digits(&self) -> u32 {
        if self.decimal_places == 0 {
            2
        } else {
            self.decimal_places
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(GatewayError::InvalidCurrency("missing code".to_string()));
        }
        if self.decimal_places > MAX_DECIMAL_PLACES {
            return Err(GatewayError::InvalidCurrency(format!(
                "{} declares {} decimal places, at most {} are supported",
                self.code, self.decimal_places, MAX_DECIMAL_PLACES
            )));
        }
        Ok(())
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimal_places, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn to_minor_units(&self, amount: Decimal) -> Result<i64> {
        let out_of_range = || GatewayError::AmountOutOfRange(format!("{} {}", amount, self.code));

        let factor = 10_i64
            .checked_pow(self.minor_digits())
            .ok_or_else(out_of_range)?;
        let scaled = amount
            .checked_mul(Decimal::from(factor))
            .ok_or_else(out_of_range)?;
        i64::try_from(scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .map_err(|_| out_of_range())
    }

    /// `None` when the currency has more decimals than a `Decimal` can hold.
    pub fn from_minor_units(&self, amount_minor: i64) -> Option<Decimal> {
        Decimal::try_new(amount_minor, self.minor_digits())
            .ok()
            .map(|amount| self.round(amount))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderLine {
    pub name: Option<String>,
    pub product_name: Option<String>,
    pub quantity: Decimal,
    pub price_unit: Decimal,
    /// Percentage, 0-100.
    pub discount: Decimal,
    pub price_subtotal: Decimal,
    /// Section and note lines carry a display type and are not billable.
    pub display_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Partner {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    reference: String,
    pub provider_code: String,
    pub amount: Decimal,
    pub currency: Currency,
    state: TransactionState,
    pub state_message: Option<String>,
    pub provider_reference: Option<String>,
    pub partner: Partner,
    pub invoice_lines: Vec<OrderLine>,
    pub sale_order_lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(reference: &str, provider_code: &str, amount: Decimal, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            provider_code: provider_code.to_string(),
            amount,
            currency,
            state: TransactionState::Draft,
            state_message: None,
            provider_reference: None,
            partner: Partner::default(),
            invoice_lines: Vec::new(),
            sale_order_lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a stored record; the remaining public fields are filled by the caller.
    pub(crate) fn restore(
        id: Uuid,
        reference: String,
        provider_code: String,
        state: TransactionState,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            reference,
            provider_code,
            amount: Decimal::ZERO,
            currency: Currency::php(),
            state,
            state_message: None,
            provider_reference: None,
            partner: Partner::default(),
            invoice_lines: Vec::new(),
            sale_order_lines: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_pending(&mut self) -> Transition {
        match self.state {
            TransactionState::Pending => Transition::Unchanged,
            TransactionState::Draft => self.move_to(TransactionState::Pending, None),
            _ => self.refuse(TransactionState::Pending),
        }
    }

    pub fn set_done(&mut self) -> Transition {
        match self.state {
            TransactionState::Done => Transition::Unchanged,
            TransactionState::Error => self.refuse(TransactionState::Done),
            _ => self.move_to(TransactionState::Done, None),
        }
    }

    pub fn set_error(&mut self, message: &str) -> Transition {
        match self.state {
            TransactionState::Error => Transition::Unchanged,
            TransactionState::Done => self.refuse(TransactionState::Error),
            _ => self.move_to(TransactionState::Error, Some(message.to_string())),
        }
    }

    /// Keeps the stored provider reference when the new one is empty.
    pub fn set_provider_reference(&mut self, provider_reference: Option<&str>) {
        if let Some(value) = provider_reference.filter(|v| !v.is_empty()) {
            if self.provider_reference.as_deref() != Some(value) {
                self.provider_reference = Some(value.to_string());
                self.updated_at = Utc::now();
            }
        }
    }

    fn move_to(&mut self, state: TransactionState, message: Option<String>) -> Transition {
        info!(
            "Transaction {} moved from {} to {}",
            self.reference,
            self.state.as_str(),
            state.as_str()
        );
        self.state = state;
        self.state_message = message;
        self.updated_at = Utc::now();
        Transition::Applied
    }

    fn refuse(&self, requested: TransactionState) -> Transition {
        warn!(
            "Refusing to move transaction {} from {} to {}",
            self.reference,
            self.state.as_str(),
            requested.as_str()
        );
        Transition::Refused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> Transaction {
        Transaction::new("S00042", "paymongo", dec!(250.00), Currency::php())
    }

    #[test]
    fn test_done_is_idempotent() {
        let mut tx = draft();
        assert_eq!(tx.set_done(), Transition::Applied);
        assert_eq!(tx.set_done(), Transition::Unchanged);
        assert_eq!(tx.state(), TransactionState::Done);
    }

    #[test]
    fn test_terminal_states_do_not_revert() {
        let mut tx = draft();
        tx.set_error("declined");
        assert_eq!(tx.set_done(), Transition::Refused);
        assert_eq!(tx.set_pending(), Transition::Refused);
        assert_eq!(tx.state(), TransactionState::Error);
        assert_eq!(tx.state_message.as_deref(), Some("declined"));
    }

    #[test]
    fn test_provider_reference_is_sticky() {
        let mut tx = draft();
        tx.set_provider_reference(Some("cs_123"));
        tx.set_provider_reference(Some(""));
        tx.set_provider_reference(None);
        assert_eq!(tx.provider_reference.as_deref(), Some("cs_123"));
    }

    #[test]
    fn test_minor_unit_conversion() {
        let php = Currency::php();
        assert_eq!(php.to_minor_units(dec!(125.00)).unwrap(), 12500);
        assert_eq!(php.to_minor_units(dec!(0.005)).unwrap(), 1);
        assert_eq!(php.from_minor_units(10000), Some(dec!(100.00)));
        assert_eq!(Currency::new("XXX", 0).minor_digits(), 2);
    }

    #[test]
    fn test_oversized_decimals_are_errors_not_panics() {
        let wide = Currency::new("PHP", 30);
        assert!(matches!(
            wide.to_minor_units(dec!(1)),
            Err(GatewayError::AmountOutOfRange(_))
        ));
        assert_eq!(wide.from_minor_units(1), None);
        assert!(matches!(wide.validate(), Err(GatewayError::InvalidCurrency(_))));

        let widest = Currency::new("PHP", MAX_DECIMAL_PLACES);
        assert!(widest.validate().is_ok());
        assert!(matches!(
            widest.to_minor_units(dec!(100)),
            Err(GatewayError::AmountOutOfRange(_))
        ));
        assert!(Currency::new(" ", 2).validate().is_err());
    }
}
