//! The top-level indexing loop.
//!
//! `run_once` drives one (contract, event) pair through plan → fetch →
//! parse → apply → commit. It is timer-free: the surrounding tick loop
//! decides when to call it, and at most one tick runs per process at a
//! time. A failed pair leaves its cursor untouched and never affects the
//! other pairs.

use std::{collections::HashMap, sync::Arc, time::Duration};

use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use alloy_primitives::Address;

use hypercerts_core::{BlockWindow, ContractEvent, StampedFact};
use hypercerts_evm::{ChainReader, LogSource};
use hypercerts_storage::HypercertsStore;

use crate::{
    apply::FactApplier,
    error::IndexerError,
    parser::{parse_log, ParseContext},
    planner::plan_window,
    registry::EventKind,
};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub chain_id: u64,
    /// Maximum number of blocks per window.
    pub batch_size: u64,
    /// Order-validator contract for post-fill re-validation.
    pub order_validator: Option<Address>,
}

/// What one `run_once` call did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// The processed window; `None` when the pair was caught up.
    pub window: Option<BlockWindow>,
    pub logs: usize,
    pub facts_applied: usize,
    pub facts_dropped: usize,
}

pub struct Orchestrator {
    store: Arc<dyn HypercertsStore>,
    source: Arc<dyn LogSource>,
    reader: Arc<dyn ChainReader>,
    options: OrchestratorOptions,
    // Single-flight guard: a tick that finds the previous one still
    // running skips instead of stacking up.
    running: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn HypercertsStore>,
        source: Arc<dyn LogSource>,
        reader: Arc<dyn ChainReader>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            source,
            reader,
            options,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Processes the next window of one pair. The cursor moves if and only
    /// if the whole window committed; an empty window still advances it so
    /// quiet ranges are not re-fetched forever.
    pub async fn run_once(&self, pair: &ContractEvent) -> Result<RunReport, IndexerError> {
        let kind = EventKind::from_name(&pair.event_name)?;
        let filter = kind.filter()?;

        let head = self
            .source
            .head_block()
            .await
            .change_context(IndexerError::Temporary)?;

        let Some(window) = plan_window(
            pair.last_block_indexed,
            pair.contract.start_block,
            self.options.batch_size,
            head,
        ) else {
            debug!(event = kind.name(), head, "caught up, nothing to do");
            return Ok(RunReport {
                window: None,
                logs: 0,
                facts_applied: 0,
                facts_dropped: 0,
            });
        };

        let logs = self
            .source
            .window_logs(pair.contract.contract_address, &filter, window)
            .await
            .change_context(IndexerError::Temporary)?;

        let ctx = self.parse_context(kind, pair).await?;
        let mut facts: Vec<StampedFact> = Vec::new();
        let mut parse_dropped = 0;
        for log in &logs {
            match parse_log(kind, &filter, log, &ctx, self.reader.as_ref()).await {
                Ok(mut parsed) => facts.append(&mut parsed),
                Err(report)
                    if matches!(report.current_context(), IndexerError::Consistency) =>
                {
                    // The chain state this log needs does not exist and a
                    // retry would see the same thing; skip the log, keep
                    // the batch.
                    error!(
                        error = ?report,
                        block = log.position.block_number,
                        log_index = log.position.log_index,
                        "dropping log with unresolvable state"
                    );
                    parse_dropped += 1;
                }
                Err(report) => return Err(report),
            }
        }

        let applier = FactApplier::new(
            self.store.as_ref(),
            self.reader.as_ref(),
            self.options.chain_id,
            pair.contract.id,
            pair.contract.contract_address,
            self.options.order_validator,
        );
        let outcome = applier.apply_batch(&facts).await?;

        // Commit happens-after all writes; a crash before this line only
        // re-applies an idempotent window.
        self.store
            .update_contract_event_cursor(pair.contract.id, pair.events_id, window.to)
            .await
            .change_context(IndexerError::Temporary)?;
        if kind == EventKind::Attested {
            for schema in ctx.schemas.values() {
                self.store
                    .update_supported_schema_cursor(schema.id, window.to)
                    .await
                    .change_context(IndexerError::Temporary)?;
            }
        }

        let facts_dropped = outcome.dropped + parse_dropped;
        info!(
            event = kind.name(),
            %window,
            logs = logs.len(),
            applied = outcome.applied,
            dropped = facts_dropped,
            "window committed"
        );

        Ok(RunReport {
            window: Some(window),
            logs: logs.len(),
            facts_applied: outcome.applied,
            facts_dropped,
        })
    }

    /// Runs every registered pair once. Failures are isolated per pair.
    pub async fn run_tick(&self) {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("previous tick still in flight, skipping");
            return;
        };

        let pairs = match self.store.list_contract_events(self.options.chain_id).await {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(error = ?err, "failed to list contract events");
                return;
            }
        };

        for pair in &pairs {
            if let Err(err) = self.run_once(pair).await {
                error!(
                    contract = %pair.contract.contract_address,
                    event = pair.event_name,
                    error = ?err,
                    "indexing run failed, cursor unchanged"
                );
            }
        }
    }

    /// Fixed-delay tick loop. An in-flight tick always completes; shutdown
    /// is honored between ticks.
    pub async fn run_loop(&self, poll_interval: Duration, ct: CancellationToken) {
        info!(
            chain_id = self.options.chain_id,
            batch_size = self.options.batch_size,
            poll_interval = ?poll_interval,
            "indexing loop started"
        );
        loop {
            self.run_tick().await;
            tokio::select! {
                _ = ct.cancelled() => {
                    info!("shutdown requested, stopping indexing loop");
                    return;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn parse_context(
        &self,
        kind: EventKind,
        pair: &ContractEvent,
    ) -> Result<ParseContext, IndexerError> {
        let schemas = if kind == EventKind::Attested {
            self.store
                .list_supported_schemas(self.options.chain_id)
                .await
                .change_context(IndexerError::Temporary)?
                .into_iter()
                .map(|schema| (schema.uid, schema))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(ParseContext {
            chain_id: self.options.chain_id,
            contracts_id: pair.contract.id,
            contract_address: pair.contract.contract_address,
            events_id: pair.events_id,
            schemas,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, U256};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use error_stack::{Report, Result};

    use hypercerts_core::{BlockWindow, Contract, ContractEvent};
    use hypercerts_evm::{EventFilter, FetchedLog, LogFetchError, LogSource};
    use hypercerts_storage::{HypercertsStore, MemoryStore};

    use crate::{
        error::IndexerError,
        parser::testing::{test_log, test_position, FakeReader},
        registry::EventKind,
    };

    use super::{Orchestrator, OrchestratorOptions, RunReport};

    const CHAIN_ID: u64 = 10;

    /// Serves a fixed set of logs to any window that contains them.
    struct FakeSource {
        head: u64,
        logs: Vec<FetchedLog>,
    }

    #[async_trait]
    impl LogSource for FakeSource {
        async fn head_block(&self) -> Result<u64, LogFetchError> {
            Ok(self.head)
        }

        async fn window_logs(
            &self,
            _address: Address,
            _filter: &EventFilter,
            window: BlockWindow,
        ) -> Result<Vec<FetchedLog>, LogFetchError> {
            Ok(self
                .logs
                .iter()
                .filter(|log| {
                    let number = log.position.block_number;
                    number >= window.from && number <= window.to
                })
                .cloned()
                .collect())
        }
    }

    /// A source that always fails, standing in for a dead node.
    struct DeadSource;

    #[async_trait]
    impl LogSource for DeadSource {
        async fn head_block(&self) -> Result<u64, LogFetchError> {
            Err(Report::new(LogFetchError::Provider))
        }

        async fn window_logs(
            &self,
            _address: Address,
            _filter: &EventFilter,
            _window: BlockWindow,
        ) -> Result<Vec<FetchedLog>, LogFetchError> {
            Err(Report::new(LogFetchError::Provider))
        }
    }

    fn contract_address() -> Address {
        Address::with_last_byte(1)
    }

    fn claim_stored_log(block: u64, log_index: u64) -> FetchedLog {
        let filter = EventKind::ClaimStored.filter().unwrap();
        let token_id: U256 = U256::from(1u64) << 128;
        test_log(
            contract_address(),
            vec![filter.topic0(), token_id.into()],
            &[
                DynSolValue::String("ipfs://claim".to_string()),
                DynSolValue::Uint(U256::from(100u64), 256),
            ],
            test_position(block, log_index),
        )
    }

    fn pair(store: &MemoryStore, last_indexed: Option<u64>) -> ContractEvent {
        let contracts_id = store.register_contract(CHAIN_ID, contract_address(), 100);
        let contract = Contract {
            id: contracts_id,
            chain_id: CHAIN_ID,
            contract_address: contract_address(),
            start_block: 100,
        };
        let events_id = store.register_contract_event(contract.clone(), "ClaimStored");
        ContractEvent {
            contract,
            events_id,
            event_name: "ClaimStored".to_string(),
            last_block_indexed: last_indexed,
        }
    }

    fn orchestrator(store: Arc<MemoryStore>, source: Arc<dyn LogSource>) -> Orchestrator {
        let reader = Arc::new(FakeReader {
            sender: Some(Address::with_last_byte(9)),
            ..Default::default()
        });
        Orchestrator::new(
            store,
            source,
            reader,
            OrchestratorOptions {
                chain_id: CHAIN_ID,
                batch_size: 1_000,
                order_validator: None,
            },
        )
    }

    #[tokio::test]
    async fn test_run_once_commits_window_and_cursor() {
        let store = Arc::new(MemoryStore::new());
        let pair = pair(&store, None);
        let source = Arc::new(FakeSource {
            head: 500,
            logs: vec![claim_stored_log(150, 0)],
        });
        let orchestrator = orchestrator(store.clone(), source);

        let report = orchestrator.run_once(&pair).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                window: Some(BlockWindow { from: 100, to: 500 }),
                logs: 1,
                facts_applied: 1,
                facts_dropped: 0,
            }
        );

        let pairs = store.list_contract_events(CHAIN_ID).await.unwrap();
        assert_eq!(pairs[0].last_block_indexed, Some(500));

        let claim = store
            .get_claim(pair.contract.id, U256::from(1u64) << 128)
            .await
            .unwrap();
        assert!(claim.is_some());
    }

    #[tokio::test]
    async fn test_replayed_window_converges_on_same_rows() {
        let store = Arc::new(MemoryStore::new());
        let pair = pair(&store, None);
        let source = Arc::new(FakeSource {
            head: 500,
            logs: vec![claim_stored_log(150, 0)],
        });
        let orchestrator = orchestrator(store.clone(), source);

        // Simulate a crash between write and cursor advance: the same
        // window is delivered twice.
        orchestrator.run_once(&pair).await.unwrap();
        orchestrator.run_once(&pair).await.unwrap();

        let (_, claim) = store
            .get_claim(pair.contract.id, U256::from(1u64) << 128)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.units, U256::from(100u64));
        assert_eq!(claim.uri.as_deref(), Some("ipfs://claim"));
    }

    #[tokio::test]
    async fn test_empty_window_still_advances_cursor() {
        let store = Arc::new(MemoryStore::new());
        let pair = pair(&store, None);
        let source = Arc::new(FakeSource {
            head: 500,
            logs: vec![],
        });
        let orchestrator = orchestrator(store.clone(), source);

        let report = orchestrator.run_once(&pair).await.unwrap();
        assert_eq!(report.logs, 0);
        assert_eq!(report.window, Some(BlockWindow { from: 100, to: 500 }));

        let pairs = store.list_contract_events(CHAIN_ID).await.unwrap();
        assert_eq!(pairs[0].last_block_indexed, Some(500));
    }

    #[tokio::test]
    async fn test_caught_up_pair_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let pair = pair(&store, Some(500));
        let source = Arc::new(FakeSource {
            head: 500,
            logs: vec![],
        });
        let orchestrator = orchestrator(store.clone(), source);

        let report = orchestrator.run_once(&pair).await.unwrap();
        assert_eq!(report.window, None);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_cursor_untouched() {
        let store = Arc::new(MemoryStore::new());
        let pair = pair(&store, None);
        let orchestrator = orchestrator(store.clone(), Arc::new(DeadSource));

        let err = orchestrator.run_once(&pair).await.unwrap_err();
        assert_matches!(err.current_context(), IndexerError::Temporary);

        let pairs = store.list_contract_events(CHAIN_ID).await.unwrap();
        assert_eq!(pairs[0].last_block_indexed, None);
    }
}
