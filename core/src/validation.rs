//! Shape validation for decoded event payloads.
//!
//! Every parser funnels its decoded values through these helpers before any
//! business logic sees them. A mismatch is a hard error for the batch; logs
//! are immutable once confirmed, so the same input is retried unchanged.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("field `{field}` has unexpected shape: expected {expected}")]
    UnexpectedShape {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{field}` is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("field `{field}` is missing")]
    Missing { field: &'static str },
    #[error("batch arrays disagree in length: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("malformed address `{0}`")]
    MalformedAddress(String),
    #[error("malformed 32-byte hex `{0}`")]
    MalformedHash(String),
}

pub fn expect_address(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<Address, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Address(address)) => Ok(*address),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "address",
        }),
    }
}

pub fn expect_uint(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<U256, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Uint(value, _)) => Ok(*value),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "uint",
        }),
    }
}

/// A uint that must fit a native u64 (strategy ids, nonces).
pub fn expect_u64(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<u64, ValidationError> {
    let value = expect_uint(field, value)?;
    value
        .try_into()
        .map_err(|_| ValidationError::OutOfRange {
            field,
            reason: format!("{value} does not fit u64"),
        })
}

pub fn expect_string(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<String, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::String(value)) => Ok(value.clone()),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "string",
        }),
    }
}

pub fn expect_bool(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<bool, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Bool(value)) => Ok(*value),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "bool",
        }),
    }
}

pub fn expect_b256(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<B256, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::FixedBytes(word, 32)) => Ok(*word),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "bytes32",
        }),
    }
}

pub fn expect_bytes(
    field: &'static str,
    value: Option<&DynSolValue>,
) -> Result<Vec<u8>, ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Bytes(bytes)) => Ok(bytes.clone()),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "bytes",
        }),
    }
}

pub fn expect_array<'a>(
    field: &'static str,
    value: Option<&'a DynSolValue>,
) -> Result<&'a [DynSolValue], ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Array(values)) | Some(DynSolValue::FixedArray(values)) => Ok(values),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "array",
        }),
    }
}

pub fn expect_tuple<'a>(
    field: &'static str,
    value: Option<&'a DynSolValue>,
) -> Result<&'a [DynSolValue], ValidationError> {
    match value {
        None => Err(ValidationError::Missing { field }),
        Some(DynSolValue::Tuple(values)) => Ok(values),
        Some(_) => Err(ValidationError::UnexpectedShape {
            field,
            expected: "tuple",
        }),
    }
}

/// Batch events carry parallel arrays; their lengths must agree.
pub fn expect_same_length(left: usize, right: usize) -> Result<(), ValidationError> {
    if left != right {
        return Err(ValidationError::LengthMismatch { left, right });
    }
    Ok(())
}

/// Parses a 0x-prefixed, 20-byte address from its storage form.
pub fn parse_address(text: &str) -> Result<Address, ValidationError> {
    text.parse::<Address>()
        .map_err(|_| ValidationError::MalformedAddress(text.to_string()))
}

/// Parses a 0x-prefixed, 32-byte hash from its storage form.
pub fn parse_b256(text: &str) -> Result<B256, ValidationError> {
    text.parse::<B256>()
        .map_err(|_| ValidationError::MalformedHash(text.to_string()))
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, U256};
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_expect_address() {
        let value = DynSolValue::Address(Address::ZERO);
        assert_eq!(expect_address("to", Some(&value)).unwrap(), Address::ZERO);
        assert_matches!(
            expect_address("to", None),
            Err(ValidationError::Missing { field: "to" })
        );
        let wrong = DynSolValue::Uint(U256::ZERO, 256);
        assert_matches!(
            expect_address("to", Some(&wrong)),
            Err(ValidationError::UnexpectedShape { .. })
        );
    }

    #[test]
    fn test_expect_u64_range() {
        let fits = DynSolValue::Uint(U256::from(7u64), 256);
        assert_eq!(expect_u64("id", Some(&fits)).unwrap(), 7);

        let too_big = DynSolValue::Uint(U256::MAX, 256);
        assert_matches!(
            expect_u64("id", Some(&too_big)),
            Err(ValidationError::OutOfRange { .. })
        );
    }

    #[test]
    fn test_expect_same_length() {
        assert!(expect_same_length(3, 3).is_ok());
        assert_matches!(
            expect_same_length(3, 2),
            Err(ValidationError::LengthMismatch { left: 3, right: 2 })
        );
    }

    #[test]
    fn test_parse_address() {
        let parsed = parse_address("0x822f17a9a5eecfd66dbaff7946a8071c265d1d07").unwrap();
        assert_ne!(parsed, Address::ZERO);
        assert_matches!(
            parse_address("not-an-address"),
            Err(ValidationError::MalformedAddress(_))
        );
    }
}
