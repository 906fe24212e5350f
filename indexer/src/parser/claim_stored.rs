use alloy_dyn_abi::DecodedEvent;
use error_stack::Result;

use hypercerts_core::{validation, Fact, LogPosition, StampedFact};
use hypercerts_evm::ChainReader;

use crate::error::{IndexerError, IndexerErrorResultExt};

/// `ClaimStored(uint256 indexed claimID, string uri, uint256 totalUnits)`
///
/// Mints a new claim. The owner stays the zero address here; the paired
/// root-token transfer resolves the actual owner. The creator is the
/// transaction's signer.
pub(super) async fn parse(
    decoded: &DecodedEvent,
    position: LogPosition,
    reader: &dyn ChainReader,
) -> Result<Vec<StampedFact>, IndexerError> {
    let token_id = validation::expect_uint("claimID", decoded.indexed.first())
        .validation("ClaimStored claimID")?;
    let uri =
        validation::expect_string("uri", decoded.body.first()).validation("ClaimStored uri")?;
    let total_units = validation::expect_uint("totalUnits", decoded.body.get(1))
        .validation("ClaimStored totalUnits")?;

    let creator = reader
        .transaction_sender(position.transaction_hash)
        .await
        .temporary("failed to resolve claim creator")?;

    Ok(vec![StampedFact::new(
        position,
        Fact::ClaimStored {
            token_id,
            uri,
            total_units,
            creator,
        },
    )])
}
