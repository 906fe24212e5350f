use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use error_stack::Result;

use crate::provider::{JsonRpcProvider, JsonRpcProviderError};

/// A log as it appears in a transaction receipt, reduced to the fields the
/// parsers cross-reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Chain reads the event parsers perform as side-channel lookups.
///
/// Kept behind a trait so parser behavior is testable without a node; all
/// implementations are read-only.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// The sender of the given transaction.
    async fn transaction_sender(&self, hash: B256) -> Result<Address, JsonRpcProviderError>;

    /// All logs emitted by the given transaction.
    async fn transaction_logs(&self, hash: B256) -> Result<Vec<ReceiptLog>, JsonRpcProviderError>;

    /// Raw output of a read-only contract call.
    async fn read_contract(&self, to: Address, data: Bytes)
        -> Result<Bytes, JsonRpcProviderError>;
}

#[async_trait]
impl ChainReader for JsonRpcProvider {
    async fn transaction_sender(&self, hash: B256) -> Result<Address, JsonRpcProviderError> {
        self.get_transaction_sender(hash).await
    }

    async fn transaction_logs(&self, hash: B256) -> Result<Vec<ReceiptLog>, JsonRpcProviderError> {
        self.get_transaction_logs(hash).await
    }

    async fn read_contract(
        &self,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, JsonRpcProviderError> {
        self.call(to, data).await
    }
}
