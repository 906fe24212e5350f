use alloy_dyn_abi::DecodedEvent;
use error_stack::Result;

use hypercerts_core::{validation, Fact, LogPosition, StampedFact};
use hypercerts_evm::ChainReader;

use crate::error::{IndexerError, IndexerErrorResultExt};

/// `AllowlistCreated(uint256 tokenID, bytes32 root)`
pub(super) fn parse_created(
    decoded: &DecodedEvent,
    position: LogPosition,
) -> Result<Vec<StampedFact>, IndexerError> {
    let token_id = validation::expect_uint("tokenID", decoded.body.first())
        .validation("AllowlistCreated tokenID")?;
    let root = validation::expect_b256("root", decoded.body.get(1))
        .validation("AllowlistCreated root")?;

    Ok(vec![StampedFact::new(
        position,
        Fact::AllowListRooted { token_id, root },
    )])
}

/// `LeafClaimed(uint256 tokenID, bytes32 leaf)`
///
/// The claimant is the transaction's sender; the apply layer cross-checks
/// leaf hash and claimant against the stored records before flipping
/// `claimed`.
pub(super) async fn parse_leaf_claimed(
    decoded: &DecodedEvent,
    position: LogPosition,
    reader: &dyn ChainReader,
) -> Result<Vec<StampedFact>, IndexerError> {
    let token_id = validation::expect_uint("tokenID", decoded.body.first())
        .validation("LeafClaimed tokenID")?;
    let leaf =
        validation::expect_b256("leaf", decoded.body.get(1)).validation("LeafClaimed leaf")?;

    let claimant = reader
        .transaction_sender(position.transaction_hash)
        .await
        .temporary("failed to resolve leaf claimant")?;

    Ok(vec![StampedFact::new(
        position,
        Fact::LeafClaimed {
            token_id,
            leaf,
            claimant,
        },
    )])
}
