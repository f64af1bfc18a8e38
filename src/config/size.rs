//! Size-with-suffix parsing for byte counts.
//!
//! Build descriptions give sizes and offsets as strings like `"64M"` or
//! `"16k"`. Suffixes are powers of 1024; bare decimal and `0x`-prefixed
//! hexadecimal values are accepted as-is.

use anyhow::{bail, Context, Result};

/// Parse a byte count with an optional `k`/`M`/`G` suffix.
///
/// Suffixes are case-insensitive and multiply by 1024 steps. A malformed
/// value is a hard error; sizes never default to zero silently.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("empty size value");
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };

    let digits = digits.trim();
    if digits.is_empty() {
        bail!("size '{}' has a suffix but no digits", input);
    }

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid size '{}'", input))?
    } else {
        digits
            .parse::<u64>()
            .with_context(|| format!("invalid size '{}'", input))?
    };

    value
        .checked_mul(multiplier)
        .with_context(|| format!("size '{}' overflows", input))
}
