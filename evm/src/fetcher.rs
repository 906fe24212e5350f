use std::collections::BTreeMap;

use alloy_primitives::Address;
use alloy_rpc_types::Log;
use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use tracing::debug;

use hypercerts_core::{BlockWindow, LogPosition};

use crate::{filter::EventFilter, provider::JsonRpcProvider};

#[derive(Debug)]
pub enum LogFetchError {
    /// The upstream node failed; retry the window unchanged.
    Provider,
    /// A returned log is missing block or index metadata (still pending).
    Metadata,
}

/// A fetched log together with its resolved chain position.
#[derive(Debug, Clone)]
pub struct FetchedLog {
    pub log: Log,
    pub position: LogPosition,
}

/// Where the orchestrator gets its logs and head blocks from.
///
/// Implemented by [`LogFetcher`] against a live node and by in-memory fakes
/// in tests.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// The chain's current head block number.
    async fn head_block(&self) -> Result<u64, LogFetchError>;

    /// All logs for one contract/event pair within the window, or failure
    /// of the window as a whole.
    async fn window_logs(
        &self,
        address: Address,
        filter: &EventFilter,
        window: BlockWindow,
    ) -> Result<Vec<FetchedLog>, LogFetchError>;
}

/// Retrieves logs for one contract/event pair within a block window.
///
/// Block timestamps are resolved here so every log carries a complete
/// position; parsers never go back to the chain for ordering metadata.
pub struct LogFetcher {
    provider: JsonRpcProvider,
}

impl LogFetcher {
    pub fn new(provider: JsonRpcProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &JsonRpcProvider {
        &self.provider
    }

    /// Fetches all logs of the window. Either the complete range is
    /// returned or the call fails and the window is retried unchanged.
    pub async fn fetch_window(
        &self,
        address: Address,
        filter: &EventFilter,
        window: BlockWindow,
    ) -> Result<Vec<FetchedLog>, LogFetchError> {
        let rpc_filter = filter.to_filter(address, window);
        let logs = self
            .provider
            .get_logs(&rpc_filter)
            .await
            .change_context(LogFetchError::Provider)
            .attach_printable_lazy(|| format!("window: {window}"))?;

        debug!(event = filter.name(), %window, count = logs.len(), "fetched logs");

        // One timestamp lookup per distinct block in the window.
        let mut timestamps = BTreeMap::new();
        for log in &logs {
            let number = log
                .block_number
                .ok_or(LogFetchError::Metadata)
                .attach_printable("log missing block number")?;
            if let Some(timestamp) = log.block_timestamp {
                timestamps.insert(number, timestamp);
            } else if !timestamps.contains_key(&number) {
                let timestamp = self
                    .provider
                    .get_block_timestamp(number)
                    .await
                    .change_context(LogFetchError::Provider)?;
                timestamps.insert(number, timestamp);
            }
        }

        let mut fetched = Vec::with_capacity(logs.len());
        for log in logs {
            let block_number = log
                .block_number
                .ok_or(LogFetchError::Metadata)
                .attach_printable("log missing block number")?;
            let log_index = log
                .log_index
                .ok_or(LogFetchError::Metadata)
                .attach_printable("log missing log index")?;
            let transaction_hash = log
                .transaction_hash
                .ok_or(LogFetchError::Metadata)
                .attach_printable("log missing transaction hash")?;
            let block_timestamp = *timestamps
                .get(&block_number)
                .expect("timestamp resolved above");

            fetched.push(FetchedLog {
                position: LogPosition {
                    block_number,
                    block_timestamp,
                    log_index,
                    transaction_hash,
                },
                log,
            });
        }

        Ok(fetched)
    }
}

#[async_trait]
impl LogSource for LogFetcher {
    async fn head_block(&self) -> Result<u64, LogFetchError> {
        self.provider
            .get_block_number()
            .await
            .change_context(LogFetchError::Provider)
    }

    async fn window_logs(
        &self,
        address: Address,
        filter: &EventFilter,
        window: BlockWindow,
    ) -> Result<Vec<FetchedLog>, LogFetchError> {
        self.fetch_window(address, filter, window).await
    }
}

impl error_stack::Context for LogFetchError {}

impl std::fmt::Display for LogFetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFetchError::Provider => write!(f, "failed to fetch logs"),
            LogFetchError::Metadata => write!(f, "log missing chain metadata"),
        }
    }
}
