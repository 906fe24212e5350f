use alloy_dyn_abi::{DecodedEvent, DynSolType};
use alloy_primitives::{keccak256, Address, B256, U256};
use error_stack::{Report, Result, ResultExt};

use hypercerts_core::{token, validation, Fact, LogPosition, Sale, StampedFact};
use hypercerts_evm::{ChainReader, ReceiptLog};

use crate::{
    error::{IndexerError, IndexerErrorResultExt},
    parser::ParseContext,
};

/// `TakerBid(...)`: an executed marketplace fill.
///
/// The event itself does not carry the hypercert id; it is recovered by
/// cross-referencing the same transaction's 1155 transfer logs against the
/// traded collection.
pub(super) async fn parse(
    decoded: &DecodedEvent,
    position: LogPosition,
    ctx: &ParseContext,
    reader: &dyn ChainReader,
) -> Result<Vec<StampedFact>, IndexerError> {
    let bid_recipient = validation::expect_address("bidRecipient", decoded.body.get(2))
        .validation("TakerBid bidRecipient")?;
    let strategy_id = validation::expect_u64("strategyId", decoded.body.get(3))
        .validation("TakerBid strategyId")?;
    let currency = validation::expect_address("currency", decoded.body.get(4))
        .validation("TakerBid currency")?;
    let collection = validation::expect_address("collection", decoded.body.get(5))
        .validation("TakerBid collection")?;

    let item_ids = validation::expect_array("itemIds", decoded.body.get(6))
        .validation("TakerBid itemIds")?
        .iter()
        .map(|id| validation::expect_uint("itemIds[]", Some(id)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .validation("TakerBid itemIds")?;
    let amounts = validation::expect_array("amounts", decoded.body.get(7))
        .validation("TakerBid amounts")?
        .iter()
        .map(|amount| validation::expect_uint("amounts[]", Some(amount)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .validation("TakerBid amounts")?;
    validation::expect_same_length(item_ids.len(), amounts.len())
        .validation("TakerBid arrays")?;

    let fee_recipients = validation::expect_array("feeRecipients", decoded.body.get(8))
        .validation("TakerBid feeRecipients")?
        .iter()
        .map(|recipient| validation::expect_address("feeRecipients[]", Some(recipient)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .validation("TakerBid feeRecipients")?;
    let fee_amounts = validation::expect_array("feeAmounts", decoded.body.get(9))
        .validation("TakerBid feeAmounts")?
        .iter()
        .map(|amount| validation::expect_uint("feeAmounts[]", Some(amount)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .validation("TakerBid feeAmounts")?;

    // The ask side's proceeds recipient is the seller.
    let seller = *fee_recipients
        .first()
        .ok_or(IndexerError::Validation)
        .attach_printable("TakerBid has no fee recipients")?;

    let transfer_logs = reader
        .transaction_logs(position.transaction_hash)
        .await
        .temporary("failed to fetch fill transaction logs")?;
    let transferred_id = find_transferred_token(&transfer_logs, collection)?;
    let hypercert_id = token::hypercert_id(
        ctx.chain_id,
        collection,
        token::claim_token_id(transferred_id),
    );

    let sale = Sale {
        transaction_hash: position.transaction_hash,
        log_index: position.log_index,
        buyer: bid_recipient,
        seller,
        strategy_id,
        currency,
        collection,
        item_ids,
        amounts,
        hypercert_id,
        fee_recipients,
        fee_amounts,
        block: hypercerts_core::entity::BlockStamp {
            number: position.block_number,
            timestamp: position.block_timestamp,
        },
    };

    Ok(vec![StampedFact::new(position, Fact::SaleExecuted(sale))])
}

/// Finds the token id moved by the fill's 1155 transfer on the traded
/// collection. Missing transfer logs are a consistency fault: the fill
/// exists but its subject cannot be resolved, and retrying will see the
/// same receipt.
fn find_transferred_token(
    logs: &[ReceiptLog],
    collection: Address,
) -> Result<U256, IndexerError> {
    let single_topic: B256 = keccak256("TransferSingle(address,address,address,uint256,uint256)");
    let batch_topic: B256 = keccak256("TransferBatch(address,address,address,uint256[],uint256[])");

    for log in logs {
        if log.address != collection {
            continue;
        }
        let Some(topic0) = log.topics.first() else {
            continue;
        };
        if *topic0 == single_topic {
            // data: abi.encode(id, value)
            if log.data.len() >= 32 {
                return Ok(U256::from_be_slice(&log.data[..32]));
            }
        } else if *topic0 == batch_topic {
            let decoded = DynSolType::parse("(uint256[],uint256[])")
                .expect("static type string")
                .abi_decode_params(&log.data)
                .validation("malformed TransferBatch data in fill transaction")?;
            let ids = validation::expect_array(
                "ids",
                decoded.as_tuple().and_then(|tuple| tuple.first()),
            )
            .validation("TransferBatch ids in fill transaction")?;
            if let Some(first) = ids.first() {
                return validation::expect_uint("ids[]", Some(first))
                    .validation("TransferBatch id in fill transaction");
            }
        }
    }

    Err(Report::new(IndexerError::Consistency))
        .attach_printable("fill transaction has no transfer log for the traded collection")
}
