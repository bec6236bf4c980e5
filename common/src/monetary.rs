//! Monetary types for PriceDesk.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional digits amounts are rounded to before they are used
/// as part of a lookup key.
pub const AMOUNT_KEY_SCALE: u32 = 2;

/// Round an amount to [`AMOUNT_KEY_SCALE`] digits and strip trailing zeros,
/// so that `10`, `10.0` and `10.001` all collapse onto the same value.
/// Midpoints round away from zero.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(AMOUNT_KEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value (high precision decimal).
    pub value: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            "BHD" | "KWD" | "OMR" => 3,
            _ => 2,
        }
    }

    /// The base currency all stored prices are denominated in.
    pub fn base() -> Self {
        Self::brl()
    }

    /// Whether this is the base currency.
    pub fn is_base(&self) -> bool {
        self.0 == "BRL"
    }

    pub fn brl() -> Self {
        Self::new("BRL")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Currency {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_amount() {
        assert_eq!(normalize_amount(dec!(10.001)), dec!(10));
        assert_eq!(normalize_amount(dec!(10.005)), dec!(10.01));
        assert_eq!(normalize_amount(dec!(99.999)), dec!(100));
        assert_eq!(normalize_amount(dec!(10.50)).to_string(), "10.5");
    }

    #[test]
    fn test_currency_code_is_uppercased() {
        assert_eq!(Currency::new(" usd ").code(), "USD");
        assert_eq!(Currency::from("brl"), Currency::base());
        assert!(Currency::from("brl").is_base());
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::eur().decimal_places(), 2);
        assert_eq!(Currency::jpy().decimal_places(), 0);
    }

    #[test]
    fn test_money_display() {
        let money = Money::new(dec!(1234.5678), Currency::jpy());
        assert_eq!(money.to_string(), "1234.5678 JPY");
    }
}
