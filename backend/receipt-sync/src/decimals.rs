//! Token amount scaling.
//!
//! Raw on-chain amounts are `uint256` integers in the token's smallest unit.
//! Scaling stays in integer arithmetic so no precision is lost for large
//! values.

use ethers::types::U256;
use ethers::utils::format_units;

use crate::errors::{Result, SyncError};

/// Precision assumed when a token's `decimals()` cannot be read.
pub const DEFAULT_DECIMALS: u32 = 18;

/// Largest precision accepted. A `uint256` has at most 78 decimal digits.
pub const MAX_DECIMALS: u32 = 77;

/// Scale `raw` down by `10^decimals` and render it as a decimal string with
/// trailing fractional zeros removed (`1500000, 6` → `"1.5"`).
pub fn normalize(raw: U256, decimals: u32) -> Result<String> {
    if decimals > MAX_DECIMALS {
        return Err(SyncError::InvalidDecimals(decimals));
    }
    let formatted =
        format_units(raw, decimals).map_err(|_| SyncError::InvalidDecimals(decimals))?;
    Ok(trim_fraction(&formatted))
}

fn trim_fraction(formatted: &str) -> String {
    match formatted.split_once('.') {
        Some((int_part, frac_part)) => {
            let frac_part = frac_part.trim_end_matches('0');
            if frac_part.is_empty() {
                int_part.to_string()
            } else {
                format!("{int_part}.{frac_part}")
            }
        }
        None => formatted.to_string(),
    }
}

/// Like [`normalize`], but falls back to `fallback` when the precision is
/// unknown or out of range so display is never blocked. An unusable
/// `fallback` gives way to [`DEFAULT_DECIMALS`].
pub fn normalize_or_default(raw: U256, decimals: Option<u32>, fallback: u32) -> (String, u32) {
    let candidates = [decimals, Some(fallback), Some(DEFAULT_DECIMALS)];
    for precision in candidates.into_iter().flatten() {
        if let Ok(value) = normalize(raw, precision) {
            return (value, precision);
        }
    }
    (raw.to_string(), 0)
}
