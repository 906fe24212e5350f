use alloy_dyn_abi::DecodedEvent;
use error_stack::Result;

use hypercerts_core::{token, validation, Fact, LogPosition, StampedFact};

use crate::error::{IndexerError, IndexerErrorResultExt};

/// `TransferSingle(address indexed operator, address indexed from, address
/// indexed to, uint256 id, uint256 value)`
///
/// A claim-root id marks the claim's own transfer (including the initial
/// mint transfer) and touches the claim row, not fraction accounting;
/// anything else reassigns a fraction's owner.
pub(super) fn parse_single(
    decoded: &DecodedEvent,
    position: LogPosition,
) -> Result<Vec<StampedFact>, IndexerError> {
    let to = validation::expect_address("to", decoded.indexed.get(2))
        .validation("TransferSingle to")?;
    let token_id =
        validation::expect_uint("id", decoded.body.first()).validation("TransferSingle id")?;

    let fact = if token::is_claim_token(token_id) {
        Fact::ClaimTransferred { token_id, to }
    } else {
        Fact::FractionTransferred { token_id, to }
    };
    Ok(vec![StampedFact::new(position, fact)])
}

/// `TransferBatch(address indexed operator, address indexed from, address
/// indexed to, uint256[] ids, uint256[] values)`
pub(super) fn parse_batch(
    decoded: &DecodedEvent,
    position: LogPosition,
) -> Result<Vec<StampedFact>, IndexerError> {
    let to =
        validation::expect_address("to", decoded.indexed.get(2)).validation("TransferBatch to")?;
    let ids =
        validation::expect_array("ids", decoded.body.first()).validation("TransferBatch ids")?;
    let values = validation::expect_array("values", decoded.body.get(1))
        .validation("TransferBatch values")?;
    validation::expect_same_length(ids.len(), values.len()).validation("TransferBatch arrays")?;

    let mut facts = Vec::with_capacity(ids.len());
    for id in ids {
        let token_id = validation::expect_uint("ids[]", Some(id)).validation("TransferBatch id")?;
        let fact = if token::is_claim_token(token_id) {
            Fact::ClaimTransferred { token_id, to }
        } else {
            Fact::FractionTransferred { token_id, to }
        };
        facts.push(StampedFact::new(position, fact));
    }
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, U256};
    use assert_matches::assert_matches;

    use hypercerts_core::Fact;

    use crate::{
        error::IndexerError,
        parser::testing::{test_log, test_position},
        registry::EventKind,
    };

    fn address_topic(address: Address) -> alloy_primitives::B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_slice());
        word.into()
    }

    #[test]
    fn test_root_transfer_touches_claim() {
        let filter = EventKind::TransferSingle.filter().unwrap();
        let to = Address::with_last_byte(5);
        let root = U256::from(1u64) << 128;
        let position = test_position(10, 0);

        let log = test_log(
            Address::with_last_byte(1),
            vec![
                filter.topic0(),
                address_topic(Address::with_last_byte(2)),
                address_topic(Address::ZERO),
                address_topic(to),
            ],
            &[
                DynSolValue::Uint(root, 256),
                DynSolValue::Uint(U256::from(1u64), 256),
            ],
            position,
        );

        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse_single(&decoded, position).unwrap();
        assert_matches!(
            &facts[0].fact,
            Fact::ClaimTransferred { token_id, to: t } => {
                assert_eq!(*token_id, root);
                assert_eq!(*t, to);
            }
        );
    }

    #[test]
    fn test_fraction_transfer_keeps_units() {
        let filter = EventKind::TransferSingle.filter().unwrap();
        let to = Address::with_last_byte(5);
        let fraction = (U256::from(1u64) << 128) + U256::from(1u64);
        let position = test_position(10, 0);

        let log = test_log(
            Address::with_last_byte(1),
            vec![
                filter.topic0(),
                address_topic(Address::with_last_byte(2)),
                address_topic(Address::with_last_byte(3)),
                address_topic(to),
            ],
            &[
                DynSolValue::Uint(fraction, 256),
                DynSolValue::Uint(U256::from(1u64), 256),
            ],
            position,
        );

        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse_single(&decoded, position).unwrap();
        assert_matches!(&facts[0].fact, Fact::FractionTransferred { .. });
    }

    #[test]
    fn test_batch_length_mismatch_rejected() {
        let filter = EventKind::TransferBatch.filter().unwrap();
        let position = test_position(10, 0);
        let log = test_log(
            Address::with_last_byte(1),
            vec![
                filter.topic0(),
                address_topic(Address::with_last_byte(2)),
                address_topic(Address::with_last_byte(3)),
                address_topic(Address::with_last_byte(4)),
            ],
            &[
                DynSolValue::Array(vec![
                    DynSolValue::Uint(U256::from(1u64) << 128, 256),
                    DynSolValue::Uint(U256::from(2u64) << 128, 256),
                ]),
                DynSolValue::Array(vec![DynSolValue::Uint(U256::from(1u64), 256)]),
            ],
            position,
        );

        let decoded = filter.decode_log(&log.log).unwrap();
        let err = super::parse_batch(&decoded, position).unwrap_err();
        assert_matches!(err.current_context(), IndexerError::Validation);
    }
}
