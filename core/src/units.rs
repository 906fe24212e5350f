//! Conversions between 256-bit unit counts and their textual storage form.
//!
//! On-chain unit and token id values exceed native integer ranges, so the
//! relational store keeps them as decimal strings. All arithmetic stays in
//! `U256`; conversion happens only at the storage boundary.

use alloy_primitives::U256;

use crate::validation::ValidationError;

/// Renders a 256-bit value in the decimal form the store expects.
pub fn to_text(value: U256) -> String {
    value.to_string()
}

/// Parses a stored decimal (or 0x-prefixed hex) string back into a `U256`.
pub fn from_text(text: &str) -> Result<U256, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::OutOfRange {
            field: "units",
            reason: "empty string".to_string(),
        });
    }

    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        U256::from_str_radix(hex, 16)
    } else {
        U256::from_str_radix(text, 10)
    };

    parsed.map_err(|err| ValidationError::OutOfRange {
        field: "units",
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use assert_matches::assert_matches;

    use crate::validation::ValidationError;

    use super::{from_text, to_text};

    #[test]
    fn test_decimal_round_trip() {
        let values = [
            U256::ZERO,
            U256::from(1u64),
            U256::from(u64::MAX),
            U256::MAX,
            U256::from(100_000_000u64) << 128,
        ];
        for value in values {
            assert_eq!(from_text(&to_text(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_hex_input_accepted() {
        assert_eq!(from_text("0xff").unwrap(), U256::from(255u64));
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert_matches!(from_text(""), Err(ValidationError::OutOfRange { .. }));
        assert_matches!(from_text("12x4"), Err(ValidationError::OutOfRange { .. }));
        assert_matches!(from_text("-5"), Err(ValidationError::OutOfRange { .. }));
    }
}
