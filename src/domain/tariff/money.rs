//! Fixed-point money
//!
//! Amounts are `rust_decimal::Decimal`; rounding always goes to the minor
//! unit of the currency, half away from zero (half-up for the non-negative
//! amounts billing produces).

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places of the minor unit.
    pub fn minor_units(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = self.currency.minor_units() as usize;
        write!(f, "{:.*} {}", places, self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn rounds_half_up_to_cents() {
        let eur = Currency::new("eur");
        assert_eq!(eur.code(), "EUR");
        assert_eq!(eur.round(dec("2.345")), dec("2.35"));
        assert_eq!(eur.round(dec("2.344999")), dec("2.34"));
        assert_eq!(eur.round(dec("0.005")), dec("0.01"));
    }

    #[test]
    fn minor_units_follow_the_currency() {
        assert_eq!(Currency::new("JPY").round(dec("100.5")), dec("101"));
        assert_eq!(Currency::new("KWD").round(dec("1.2345")), dec("1.235"));
    }

    #[test]
    fn money_displays_minor_units() {
        let m = Money::new(dec("4"), Currency::new("EUR"));
        assert_eq!(m.to_string(), "4.00 EUR");
    }
}
