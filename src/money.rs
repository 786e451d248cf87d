//! Currency conversion between system minor units and provider encodings
//!
//! The platform keeps every balance and amount as integer minor units
//! (i64). Aggregators speak three different encodings: integer cents,
//! decimal strings ("12.50"), and raw floats. This module is the single
//! choke point for translating between the two worlds so rounding
//! behavior stays uniform. Integer and string encodings are exact;
//! float decoding rounds half-to-even.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Amount as one of the provider-side encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderAmount {
    Cents(i64),
    Decimal(String),
    Float(f64),
}

/// Currency-aware converter. Stateless; per-currency decimal exponents
/// are looked up by ISO code.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrencyConverter;

impl CurrencyConverter {
    pub fn new() -> Self {
        Self
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn exponent(&self, currency: &str) -> u32 {
        match currency {
            // Zero-decimal currencies
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
            // Three-decimal currencies
            "BHD" | "KWD" | "IQD" | "JOD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }

    fn scale(&self, currency: &str) -> i64 {
        10i64.pow(self.exponent(currency))
    }

    /// Encode minor units as integer cents (always exponent-2 on the
    /// wire, regardless of the currency's own exponent). Exponent-3
    /// currencies cannot represent their last minor digit in cents;
    /// that digit rounds half-to-even, matching the float decode rule.
    pub fn to_provider_cents(&self, minor: i64, currency: &str) -> i64 {
        match self.exponent(currency) {
            2 => minor,
            0 => minor * 100,
            exp => {
                let down = 10i64.pow(exp - 2);
                div_round_half_even(minor, down)
            }
        }
    }

    /// Decode integer cents back into system minor units.
    pub fn from_provider_cents(&self, cents: i64, currency: &str) -> i64 {
        match self.exponent(currency) {
            2 => cents,
            0 => cents / 100,
            exp => cents * 10i64.pow(exp - 2),
        }
    }

    /// Encode minor units as an exact decimal string, e.g. 1250 EUR
    /// minor units -> "12.50", 500 JPY -> "500".
    pub fn to_provider_decimal(&self, minor: i64, currency: &str) -> String {
        let exp = self.exponent(currency);
        if exp == 0 {
            return minor.to_string();
        }
        let scale = self.scale(currency);
        let sign = if minor < 0 { "-" } else { "" };
        let abs = minor.unsigned_abs();
        let whole = abs / scale as u64;
        let frac = abs % scale as u64;
        format!("{}{}.{:0width$}", sign, whole, frac, width = exp as usize)
    }

    /// Parse a decimal string back into minor units. Exact; rejects
    /// strings with more fractional digits than the currency carries.
    pub fn from_provider_decimal(&self, text: &str, currency: &str) -> EngineResult<i64> {
        let exp = self.exponent(currency) as usize;
        let text = text.trim();
        let (sign, digits) = match text.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, text),
        };
        let (whole_part, frac_part) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole_part.is_empty() && frac_part.is_empty() {
            return Err(EngineError::Validation(format!("empty amount '{}'", text)));
        }
        if frac_part.len() > exp {
            return Err(EngineError::Validation(format!(
                "amount '{}' has more than {} decimal places for {}",
                text, exp, currency
            )));
        }
        let parse = |s: &str| -> EngineResult<u64> {
            if s.is_empty() {
                return Ok(0);
            }
            s.parse::<u64>()
                .map_err(|_| EngineError::Validation(format!("malformed amount '{}'", text)))
        };
        let whole = parse(whole_part)?;
        let frac = parse(frac_part)?;
        let frac_scaled = frac * 10u64.pow((exp - frac_part.len()) as u32);
        let minor = whole
            .checked_mul(self.scale(currency) as u64)
            .and_then(|w| w.checked_add(frac_scaled))
            .ok_or_else(|| EngineError::Validation(format!("amount '{}' out of range", text)))?;
        Ok(sign * minor as i64)
    }

    /// Encode minor units as a major-unit float.
    pub fn to_provider_float(&self, minor: i64, currency: &str) -> f64 {
        minor as f64 / self.scale(currency) as f64
    }

    /// Decode a major-unit float into minor units, rounding half-to-even
    /// at the currency's last minor digit.
    pub fn from_provider_float(&self, amount: f64, currency: &str) -> EngineResult<i64> {
        if !amount.is_finite() {
            return Err(EngineError::Validation(format!("non-finite amount {}", amount)));
        }
        let scaled = amount * self.scale(currency) as f64;
        Ok(round_half_even(scaled))
    }

    /// Decode any provider encoding.
    pub fn to_system_units(&self, amount: &ProviderAmount, currency: &str) -> EngineResult<i64> {
        match amount {
            ProviderAmount::Cents(c) => Ok(self.from_provider_cents(*c, currency)),
            ProviderAmount::Decimal(s) => self.from_provider_decimal(s, currency),
            ProviderAmount::Float(f) => self.from_provider_float(*f, currency),
        }
    }
}

/// Banker's rounding for integer division by a positive divisor.
fn div_round_half_even(value: i64, divisor: i64) -> i64 {
    let quotient = value.div_euclid(divisor);
    let remainder = value.rem_euclid(divisor);
    let twice = remainder * 2;
    if twice > divisor || (twice == divisor && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// Banker's rounding to the nearest integer.
fn round_half_even(value: f64) -> i64 {
    let floor = value.floor();
    let diff = value - floor;
    if (diff - 0.5).abs() < f64::EPSILON {
        let low = floor as i64;
        if low % 2 == 0 {
            low
        } else {
            low + 1
        }
    } else {
        value.round() as i64
    }
}
