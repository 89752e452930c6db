//! Fixed-point conversions between on-chain integers and display strings.
//!
//! The number of decimals always comes from the token contract being displayed. Nothing in
//! here assumes 18.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// Largest decimals value any ERC-20 in practice reports. 10^77 is the last power of ten
/// that fits in a U256.
const MAX_DECIMALS: u8 = 77;

fn ten_pow(decimals: u8) -> U256 {
    (0..decimals).fold(U256::from(1u8), |acc, _| acc * U256::from(10u8))
}

fn split(raw: U256, decimals: u8) -> (U256, String) {
    let decimals = decimals.min(MAX_DECIMALS);
    if decimals == 0 {
        return (raw, String::new());
    }
    let base = ten_pow(decimals);
    let whole = raw / base;
    let frac = (raw % base).to_string();
    let padded = format!("{frac:0>width$}", width = decimals as usize);
    (whole, padded)
}

/// Exact decimal rendering with trailing zeros trimmed: `1500000, 6 -> "1.5"`.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let (whole, frac) = split(raw, decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

/// Display rendering truncated (not rounded) to `places` fraction digits, with thousands
/// separators on the integer part.
pub fn format_fixed(raw: U256, decimals: u8, places: u8) -> String {
    let (whole, frac) = split(raw, decimals);
    let whole = group_thousands(&whole.to_string());
    let frac: String = frac.chars().take(places as usize).collect();
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{whole}.{frac}")
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Parse a user-entered decimal amount into base units.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WalletError::InvalidAmount("empty amount".into()));
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(WalletError::InvalidAmount(format!("not a number: {trimmed}")));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(WalletError::InvalidAmount(format!("not a number: {trimmed}")));
    }
    if frac.len() > decimals as usize {
        return Err(WalletError::InvalidAmount(format!(
            "at most {decimals} decimal places allowed"
        )));
    }

    let digits = format!("{whole}{frac:0<width$}", width = decimals as usize);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    digits
        .parse::<U256>()
        .map_err(|_| WalletError::InvalidAmount(format!("amount too large: {trimmed}")))
}

/// A token amount together with the decimals of the contract it was read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub raw: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(U256::ZERO, decimals)
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    pub fn display(&self, places: u8) -> String {
        format_fixed(self.raw, self.decimals, places)
    }

    pub fn saturating_sub(&self, other: U256) -> Self {
        Self::new(self.raw.saturating_sub(other), self.decimals)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

/// Basis points as a percentage string: `1250 -> "12.5%"`.
pub fn format_bps(bps: u64) -> String {
    format!("{}%", format_units(U256::from(bps), 2))
}

/// Share of `part` in `total`, in basis points, capped at 100%.
pub fn ratio_bps(part: U256, total: U256) -> u64 {
    if total.is_zero() {
        return 0;
    }
    let bps = part.saturating_mul(U256::from(10_000u64)) / total;
    if bps > U256::from(10_000u64) {
        10_000
    } else {
        bps.as_limbs()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_raw_value_renders_per_decimals() {
        let raw = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(format_units(raw, 18), "1");
        assert_eq!(format_units(raw, 6), "1000000000000");
        assert_ne!(Amount::new(raw, 6).to_string(), Amount::new(raw, 18).to_string());
    }

    #[test]
    fn format_trims_and_pads_fraction() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(5u64), 6), "0.000005");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(format_units(U256::ZERO, 18), "0");
    }

    #[test]
    fn fixed_format_truncates_and_groups() {
        let raw = U256::from(1_234_567_891_234u64);
        assert_eq!(format_fixed(raw, 6, 2), "1,234,567.89");
        assert_eq!(format_fixed(U256::from(100_000_000u64), 6, 4), "100");
        assert_eq!(format_fixed(U256::from(999u64), 0, 2), "999");
    }

    #[test]
    fn parse_respects_decimals() {
        assert_eq!(parse_units("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_units("100", 6).unwrap(), U256::from(100_000_000u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
        assert_eq!(parse_units("0", 18).unwrap(), U256::ZERO);
        assert!(parse_units("1.1234567", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
        assert!(parse_units("", 6).is_err());
        assert!(parse_units(".", 6).is_err());
    }

    #[test]
    fn percentages() {
        assert_eq!(format_bps(1250), "12.5%");
        assert_eq!(format_bps(3500), "35%");
        assert_eq!(ratio_bps(U256::from(25u64), U256::from(100u64)), 2500);
        assert_eq!(ratio_bps(U256::from(5u64), U256::ZERO), 0);
        assert_eq!(ratio_bps(U256::from(200u64), U256::from(100u64)), 10_000);
    }
}
