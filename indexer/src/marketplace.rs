//! Marketplace order re-validation.
//!
//! After a fill is stored, every open order overlapping the traded item ids
//! is re-checked through the order-validator contract; orders whose
//! validator code is non-zero (e.g. an expired nonce) are marked invalid.
//! Kept behind a store-trait-only interface so it can be lifted into a
//! downstream consumer of the fill stream without touching the ledger.

use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::Function;
use alloy_primitives::{Address, Bytes};
use error_stack::{Result, ResultExt};
use tracing::{debug, warn};

use hypercerts_core::{validation, Sale};
use hypercerts_evm::ChainReader;
use hypercerts_storage::HypercertsStore;

use crate::error::{IndexerError, IndexerErrorResultExt};

const CHECK_ORDER_NONCE: &str =
    "function checkOrderNonce(address signer, uint256 orderNonce) view returns (uint256)";

/// Re-validates all open orders overlapping the sale's item ids. Returns
/// how many orders were invalidated.
pub async fn revalidate_orders(
    store: &dyn HypercertsStore,
    reader: &dyn ChainReader,
    validator: Option<Address>,
    chain_id: u64,
    sale: &Sale,
) -> Result<usize, IndexerError> {
    let orders = store
        .list_open_orders_overlapping(chain_id, &sale.item_ids)
        .await
        .change_context(IndexerError::Temporary)?;
    if orders.is_empty() {
        return Ok(0);
    }

    let Some(validator) = validator else {
        debug!(orders = orders.len(), "no order validator configured, skipping re-validation");
        return Ok(0);
    };

    let function =
        Function::parse(CHECK_ORDER_NONCE).configuration("failed to parse validator signature")?;

    let mut invalidated = 0;
    for order in orders {
        let call_data = function
            .abi_encode_input(&[
                DynSolValue::Address(order.signer),
                DynSolValue::Uint(order.order_nonce, 256),
            ])
            .validation("failed to encode order validation call")?;
        let output = reader
            .read_contract(validator, Bytes::from(call_data))
            .await
            .temporary("order validation call failed")?;
        let outputs = function
            .abi_decode_output(&output, true)
            .validation("failed to decode order validation result")?;
        let code = validation::expect_u64("validationCode", outputs.first())
            .validation("order validation code")?;

        if code != 0 {
            warn!(order = %order.id, code, "order no longer executable, invalidating");
            store
                .invalidate_order(&order.id, vec![code])
                .await
                .change_context(IndexerError::Temporary)?;
            invalidated += 1;
        }
    }
    Ok(invalidated)
}
