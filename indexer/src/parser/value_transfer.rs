use alloy_dyn_abi::DecodedEvent;
use error_stack::Result;

use hypercerts_core::{token, validation, Fact, LogPosition, StampedFact};

use crate::error::{IndexerError, IndexerErrorResultExt};

/// `ValueTransfer(uint256 claimID, uint256 fromTokenID, uint256 toTokenID,
/// uint256 value)`
///
/// Moves units between two fractions under one claim. A zero `fromTokenID`
/// is a mint into the target fraction, a zero `toTokenID` is a burn.
pub(super) fn parse_single(
    decoded: &DecodedEvent,
    position: LogPosition,
) -> Result<Vec<StampedFact>, IndexerError> {
    let claim_id = validation::expect_uint("claimID", decoded.body.first())
        .validation("ValueTransfer claimID")?;
    let from_token_id = validation::expect_uint("fromTokenID", decoded.body.get(1))
        .validation("ValueTransfer fromTokenID")?;
    let to_token_id = validation::expect_uint("toTokenID", decoded.body.get(2))
        .validation("ValueTransfer toTokenID")?;
    let units = validation::expect_uint("value", decoded.body.get(3))
        .validation("ValueTransfer value")?;

    Ok(vec![StampedFact::new(
        position,
        Fact::UnitsTransferred {
            claim_token_id: token::claim_token_id(claim_id),
            from_token_id,
            to_token_id,
            units,
        },
    )])
}

/// `BatchValueTransfer(uint256[] claimIDs, uint256[] fromTokenIDs,
/// uint256[] toTokenIDs, uint256[] values)`
///
/// One fact per (claim, from, to, value) quadruple; every claim resolves
/// independently.
pub(super) fn parse_batch(
    decoded: &DecodedEvent,
    position: LogPosition,
) -> Result<Vec<StampedFact>, IndexerError> {
    let claim_ids = validation::expect_array("claimIDs", decoded.body.first())
        .validation("BatchValueTransfer claimIDs")?;
    let from_ids = validation::expect_array("fromTokenIDs", decoded.body.get(1))
        .validation("BatchValueTransfer fromTokenIDs")?;
    let to_ids = validation::expect_array("toTokenIDs", decoded.body.get(2))
        .validation("BatchValueTransfer toTokenIDs")?;
    let values = validation::expect_array("values", decoded.body.get(3))
        .validation("BatchValueTransfer values")?;

    validation::expect_same_length(claim_ids.len(), from_ids.len())
        .validation("BatchValueTransfer arrays")?;
    validation::expect_same_length(claim_ids.len(), to_ids.len())
        .validation("BatchValueTransfer arrays")?;
    validation::expect_same_length(claim_ids.len(), values.len())
        .validation("BatchValueTransfer arrays")?;

    let mut facts = Vec::with_capacity(claim_ids.len());
    for i in 0..claim_ids.len() {
        let claim_id = validation::expect_uint("claimIDs[]", claim_ids.get(i))
            .validation("BatchValueTransfer claimID")?;
        let from_token_id = validation::expect_uint("fromTokenIDs[]", from_ids.get(i))
            .validation("BatchValueTransfer fromTokenID")?;
        let to_token_id = validation::expect_uint("toTokenIDs[]", to_ids.get(i))
            .validation("BatchValueTransfer toTokenID")?;
        let units = validation::expect_uint("values[]", values.get(i))
            .validation("BatchValueTransfer value")?;

        facts.push(StampedFact::new(
            position,
            Fact::UnitsTransferred {
                claim_token_id: token::claim_token_id(claim_id),
                from_token_id,
                to_token_id,
                units,
            },
        ));
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
        parser::testing::{test_log, test_position},
        registry::EventKind,
    };

    fn uint(value: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(value), 256)
    }

    #[test]
    fn test_parse_mint_into_fraction() {
        let filter = EventKind::ValueTransfer.filter().unwrap();
        let root = U256::from(1u64) << 128;
        let fraction = root + U256::from(1u64);
        let position = test_position(20, 1);

        let log = test_log(
            Address::with_last_byte(1),
            vec![filter.topic0()],
            &[
                DynSolValue::Uint(root, 256),
                uint(0),
                DynSolValue::Uint(fraction, 256),
                uint(100),
            ],
            position,
        );

        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse_single(&decoded, position).unwrap();
        assert_matches!(
            &facts[0].fact,
            Fact::UnitsTransferred { claim_token_id, from_token_id, to_token_id, units } => {
                assert_eq!(*claim_token_id, root);
                assert_eq!(*from_token_id, U256::ZERO);
                assert_eq!(*to_token_id, fraction);
                assert_eq!(*units, U256::from(100u64));
            }
        );
    }

    #[test]
    fn test_parse_batch_emits_one_fact_per_quadruple() {
        let filter = EventKind::BatchValueTransfer.filter().unwrap();
        let root_a = U256::from(1u64) << 128;
        let root_b = U256::from(2u64) << 128;
        let position = test_position(20, 1);

        let log = test_log(
            Address::with_last_byte(1),
            vec![filter.topic0()],
            &[
                DynSolValue::Array(vec![
                    DynSolValue::Uint(root_a, 256),
                    DynSolValue::Uint(root_b, 256),
                ]),
                DynSolValue::Array(vec![uint(0), uint(0)]),
                DynSolValue::Array(vec![
                    DynSolValue::Uint(root_a + U256::from(1u64), 256),
                    DynSolValue::Uint(root_b + U256::from(1u64), 256),
                ]),
                DynSolValue::Array(vec![uint(50), uint(70)]),
            ],
            position,
        );

        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse_batch(&decoded, position).unwrap();
        assert_eq!(facts.len(), 2);
        assert_matches!(
            &facts[1].fact,
            Fact::UnitsTransferred { claim_token_id, units, .. } => {
                assert_eq!(*claim_token_id, root_b);
                assert_eq!(*units, U256::from(70u64));
            }
        );
    }
}
