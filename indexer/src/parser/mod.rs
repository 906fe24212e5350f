//! Per-event parsing of raw logs into typed domain facts.
//!
//! One pure function per event type. Each parser validates its event's
//! field shapes and fails loudly on mismatch: a malformed log aborts the
//! batch rather than being silently dropped, because partial ledger
//! application is worse than a retry. Parsers that need chain reads (owner
//! resolution, attestation bodies, fill transfer logs) perform them here;
//! those reads fail as `Temporary` and are retried at the orchestrator.

mod allowlist;
mod attestation;
mod claim_stored;
mod taker_bid;
mod transfer;
mod value_transfer;

use std::collections::HashMap;

use alloy_primitives::{Address, B256};
use error_stack::{Result, ResultExt};

use hypercerts_core::{StampedFact, SupportedSchema};
use hypercerts_evm::{ChainReader, EventFilter, FetchedLog};

use crate::{error::IndexerError, registry::EventKind};

/// Side-channel context stamped onto parsed facts.
pub struct ParseContext {
    pub chain_id: u64,
    pub contracts_id: i64,
    pub contract_address: Address,
    pub events_id: i64,
    /// Schemas known for this chain, keyed by uid. Only consulted by the
    /// attestation parser.
    pub schemas: HashMap<B256, SupportedSchema>,
}

/// Parses one fetched log into zero or more stamped facts.
pub async fn parse_log(
    kind: EventKind,
    filter: &EventFilter,
    fetched: &FetchedLog,
    ctx: &ParseContext,
    reader: &dyn ChainReader,
) -> Result<Vec<StampedFact>, IndexerError> {
    let decoded = filter
        .decode_log(&fetched.log)
        .change_context(IndexerError::Validation)
        .attach_printable_lazy(|| format!("event: {}", kind.name()))?;
    let position = fetched.position;

    match kind {
        EventKind::ClaimStored => claim_stored::parse(&decoded, position, reader).await,
        EventKind::TransferSingle => transfer::parse_single(&decoded, position),
        EventKind::TransferBatch => transfer::parse_batch(&decoded, position),
        EventKind::ValueTransfer => value_transfer::parse_single(&decoded, position),
        EventKind::BatchValueTransfer => value_transfer::parse_batch(&decoded, position),
        EventKind::AllowlistCreated => allowlist::parse_created(&decoded, position),
        EventKind::LeafClaimed => allowlist::parse_leaf_claimed(&decoded, position, reader).await,
        EventKind::Attested => attestation::parse(&decoded, position, ctx, reader).await,
        EventKind::TakerBid => taker_bid::parse(&decoded, position, ctx, reader).await,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders for synthetic logs and a scripted chain reader.

    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, Bytes, B256};
    use alloy_rpc_types::Log;
    use async_trait::async_trait;
    use error_stack::{Report, Result};

    use hypercerts_core::LogPosition;
    use hypercerts_evm::{ChainReader, FetchedLog, JsonRpcProviderError, ReceiptLog};

    pub fn test_position(block_number: u64, log_index: u64) -> LogPosition {
        LogPosition {
            block_number,
            block_timestamp: block_number * 12,
            log_index,
            transaction_hash: B256::with_last_byte((block_number + log_index) as u8),
        }
    }

    /// Builds a fetched log with the given topics and ABI-encoded body.
    pub fn test_log(
        address: Address,
        topics: Vec<B256>,
        body: &[DynSolValue],
        position: LogPosition,
    ) -> FetchedLog {
        let data = DynSolValue::Tuple(body.to_vec()).abi_encode_params();
        let inner = alloy_primitives::Log::new_unchecked(address, topics, Bytes::from(data));
        let log = Log {
            inner,
            block_hash: None,
            block_number: Some(position.block_number),
            block_timestamp: Some(position.block_timestamp),
            transaction_hash: Some(position.transaction_hash),
            transaction_index: None,
            log_index: Some(position.log_index),
            removed: false,
        };
        FetchedLog { log, position }
    }

    /// A chain reader answering from canned values.
    #[derive(Default)]
    pub struct FakeReader {
        pub sender: Option<Address>,
        pub logs: Vec<ReceiptLog>,
        pub call_output: Option<Bytes>,
    }

    #[async_trait]
    impl ChainReader for FakeReader {
        async fn transaction_sender(
            &self,
            _hash: B256,
        ) -> Result<Address, JsonRpcProviderError> {
            self.sender
                .ok_or_else(|| Report::new(JsonRpcProviderError::NotFound))
        }

        async fn transaction_logs(
            &self,
            _hash: B256,
        ) -> Result<Vec<ReceiptLog>, JsonRpcProviderError> {
            Ok(self.logs.clone())
        }

        async fn read_contract(
            &self,
            _to: Address,
            _data: Bytes,
        ) -> Result<Bytes, JsonRpcProviderError> {
            self.call_output
                .clone()
                .ok_or_else(|| Report::new(JsonRpcProviderError::NotFound))
        }
    }
}
