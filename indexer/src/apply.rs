//! Applies parsed facts to the store.
//!
//! Facts are applied in chain order. Consistency faults drop the single
//! fact (logged, counted) and let the batch advance; everything else fails
//! the batch so the window is retried with the cursor untouched.

use alloy_primitives::{Address, U256};
use error_stack::{Report, Result, ResultExt};
use tracing::{debug, error};

use hypercerts_core::{
    entity::BlockStamp, token, Claim, Fact, Fraction, LogPosition, StampedFact,
};
use hypercerts_evm::ChainReader;
use hypercerts_storage::{HypercertsStore, LeafClaimOutcome};

use crate::{allowlist, error::IndexerError, ledger::UnitLedger, marketplace};

pub struct FactApplier<'a> {
    store: &'a dyn HypercertsStore,
    reader: &'a dyn ChainReader,
    chain_id: u64,
    contracts_id: i64,
    contract_address: Address,
    order_validator: Option<Address>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub dropped: usize,
}

impl<'a> FactApplier<'a> {
    pub fn new(
        store: &'a dyn HypercertsStore,
        reader: &'a dyn ChainReader,
        chain_id: u64,
        contracts_id: i64,
        contract_address: Address,
        order_validator: Option<Address>,
    ) -> Self {
        Self {
            store,
            reader,
            chain_id,
            contracts_id,
            contract_address,
            order_validator,
        }
    }

    /// Applies a whole batch. Unit transfers go through the ledger as one
    /// reconciled write; everything else is applied per fact in chain
    /// order.
    pub async fn apply_batch(&self, facts: &[StampedFact]) -> Result<ApplyOutcome, IndexerError> {
        let mut ordered: Vec<&StampedFact> = facts.iter().collect();
        ordered.sort_by_key(|stamped| stamped.position.order_key());

        let mut outcome = ApplyOutcome::default();
        for stamped in &ordered {
            if matches!(stamped.fact, Fact::UnitsTransferred { .. }) {
                continue;
            }
            match self.apply_one(stamped).await {
                Ok(()) => outcome.applied += 1,
                Err(report)
                    if matches!(report.current_context(), IndexerError::Consistency) =>
                {
                    // Retrying would hit the same missing state; do not
                    // block the pipeline on one bad fact.
                    error!(
                        error = ?report,
                        block = stamped.position.block_number,
                        log_index = stamped.position.log_index,
                        "dropping fact with unresolvable state"
                    );
                    outcome.dropped += 1;
                }
                Err(report) => return Err(report),
            }
        }

        let ledger = UnitLedger::new(self.store, self.chain_id, self.contract_address);
        outcome.applied += ledger.apply_unit_transfers(facts).await?;

        Ok(outcome)
    }

    async fn apply_one(&self, stamped: &StampedFact) -> Result<(), IndexerError> {
        let stamp = position_stamp(stamped.position);
        match &stamped.fact {
            Fact::ClaimStored {
                token_id,
                uri,
                total_units,
                creator,
            } => {
                self.store
                    .upsert_claim(Claim {
                        contracts_id: self.contracts_id,
                        token_id: token::claim_token_id(*token_id),
                        hypercert_id: token::hypercert_id(
                            self.chain_id,
                            self.contract_address,
                            *token_id,
                        ),
                        creator_address: Some(*creator),
                        // The paired root transfer resolves the owner.
                        owner_address: Some(Address::ZERO),
                        units: *total_units,
                        uri: Some(uri.clone()),
                        creation_block: Some(stamp),
                        last_update_block: Some(stamp),
                    })
                    .await
                    .change_context(IndexerError::Temporary)?;
                Ok(())
            }
            Fact::ClaimTransferred { token_id, to } => {
                let claims_id = self.resolve_claim(*token_id, stamp).await?;
                self.store
                    .set_claim_owner(claims_id, *to, stamp)
                    .await
                    .change_context(IndexerError::Temporary)?;
                Ok(())
            }
            Fact::FractionTransferred { token_id, to } => {
                let claims_id = self.resolve_claim(*token_id, stamp).await?;
                let existing = self
                    .store
                    .get_fraction(claims_id, *token_id)
                    .await
                    .change_context(IndexerError::Temporary)?;
                let mut fraction = existing.unwrap_or(Fraction {
                    claims_id,
                    token_id: *token_id,
                    owner_address: None,
                    units: U256::ZERO,
                    creation_block: None,
                    last_update_block: None,
                });
                fraction.owner_address = Some(*to);
                if fraction.creation_block.is_none() {
                    fraction.creation_block = Some(stamp);
                }
                fraction.last_update_block = Some(stamp);
                self.store
                    .upsert_fractions(vec![fraction])
                    .await
                    .change_context(IndexerError::Temporary)?;
                Ok(())
            }
            // Reconciled by the ledger, not per fact.
            Fact::UnitsTransferred { .. } => Ok(()),
            Fact::AllowListRooted { token_id, root } => {
                let claims_id = self.resolve_claim(*token_id, stamp).await?;
                let allow_list_data_id = match self
                    .store
                    .find_allow_list_by_root(*root)
                    .await
                    .change_context(IndexerError::Temporary)?
                {
                    Some(data) => data.id,
                    // Root seen before the off-chain blob: store a stub the
                    // blob ingestion later fills in.
                    None => self
                        .store
                        .upsert_allow_list_data(*root, None, serde_json::Value::Null)
                        .await
                        .change_context(IndexerError::Temporary)?,
                };
                self.store
                    .link_claim_allow_list(claims_id, allow_list_data_id)
                    .await
                    .change_context(IndexerError::Temporary)?;
                Ok(())
            }
            Fact::LeafClaimed {
                token_id,
                leaf,
                claimant,
            } => {
                let claims_id = self.resolve_claim(*token_id, stamp).await?;
                let Some(allow_list) = self
                    .store
                    .allow_list_for_claim(claims_id)
                    .await
                    .change_context(IndexerError::Temporary)?
                else {
                    return Err(Report::new(IndexerError::Consistency))
                        .attach_printable("leaf claimed for a claim with no allow list")
                        .attach_printable(format!("token id: {token_id}"));
                };
                allowlist::ensure_parsed(self.store, &allow_list).await?;

                let result = self
                    .store
                    .mark_leaf_claimed(allow_list.id, *leaf, *claimant)
                    .await
                    .change_context(IndexerError::Temporary)?;
                match result {
                    LeafClaimOutcome::Claimed => Ok(()),
                    LeafClaimOutcome::AlreadyClaimed => {
                        // Duplicate delivery of an immutable chain event.
                        debug!(leaf = %leaf, "leaf already claimed, replay ignored");
                        Ok(())
                    }
                    LeafClaimOutcome::NoMatch => Err(Report::new(IndexerError::Consistency))
                        .attach_printable("no allow list record matches the claimed leaf")
                        .attach_printable(format!("leaf: {leaf}, claimant: {claimant}")),
                }
            }
            Fact::Attested(attestation) => {
                self.store
                    .upsert_attestation(attestation.clone())
                    .await
                    .change_context(IndexerError::Temporary)?;
                Ok(())
            }
            Fact::SaleExecuted(sale) => {
                self.store
                    .upsert_sale(sale.clone())
                    .await
                    .change_context(IndexerError::Temporary)?;
                marketplace::revalidate_orders(
                    self.store,
                    self.reader,
                    self.order_validator,
                    self.chain_id,
                    sale,
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn resolve_claim(&self, token_id: U256, stamp: BlockStamp) -> Result<i64, IndexerError> {
        self.store
            .get_or_create_claim(self.chain_id, self.contract_address, token_id, stamp)
            .await
            .change_context(IndexerError::Temporary)
    }
}

fn position_stamp(position: LogPosition) -> BlockStamp {
    BlockStamp {
        number: position.block_number,
        timestamp: position.block_timestamp,
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};

    use hypercerts_core::{Fact, LogPosition, StampedFact};
    use hypercerts_merkle::{leaf_hash, AllowListEntry};
    use hypercerts_storage::{HypercertsStore, MemoryStore};

    use crate::{allowlist::ingest_allow_list, parser::testing::FakeReader};

    use super::FactApplier;

    const CHAIN_ID: u64 = 10;

    fn contract() -> Address {
        Address::with_last_byte(1)
    }

    fn root() -> U256 {
        U256::from(1u64) << 128
    }

    fn position(block: u64, log_index: u64) -> LogPosition {
        LogPosition {
            block_number: block,
            block_timestamp: block * 12,
            log_index,
            transaction_hash: Default::default(),
        }
    }

    fn applier<'a>(
        store: &'a MemoryStore,
        reader: &'a FakeReader,
        contracts_id: i64,
    ) -> FactApplier<'a> {
        FactApplier::new(store, reader, CHAIN_ID, contracts_id, contract(), None)
    }

    #[tokio::test]
    async fn test_mint_then_transfer_updates_owner_only() {
        let store = MemoryStore::new();
        let reader = FakeReader::default();
        let contracts_id = store.register_contract(CHAIN_ID, contract(), 0);
        let applier = applier(&store, &reader, contracts_id);
        let owner = Address::with_last_byte(7);
        let fraction = root() + U256::from(1u64);

        applier
            .apply_batch(&[
                StampedFact::new(
                    position(1, 0),
                    Fact::ClaimStored {
                        token_id: root(),
                        uri: "ipfs://claim".to_string(),
                        total_units: U256::from(100u64),
                        creator: owner,
                    },
                ),
                StampedFact::new(
                    position(1, 1),
                    Fact::UnitsTransferred {
                        claim_token_id: root(),
                        from_token_id: U256::ZERO,
                        to_token_id: fraction,
                        units: U256::from(100u64),
                    },
                ),
                StampedFact::new(
                    position(1, 2),
                    Fact::FractionTransferred {
                        token_id: fraction,
                        to: owner,
                    },
                ),
            ])
            .await
            .unwrap();

        let (claims_id, claim) = store.get_claim(contracts_id, root()).await.unwrap().unwrap();
        assert_eq!(claim.units, U256::from(100u64));
        let stored = store.get_fraction(claims_id, fraction).await.unwrap().unwrap();
        assert_eq!(stored.owner_address, Some(owner));
        assert_eq!(stored.units, U256::from(100u64));
    }

    #[tokio::test]
    async fn test_leaf_claimed_is_idempotent_and_faults_on_missing() {
        let store = MemoryStore::new();
        let reader = FakeReader::default();
        let contracts_id = store.register_contract(CHAIN_ID, contract(), 0);
        let applier = applier(&store, &reader, contracts_id);
        let claimant = Address::with_last_byte(3);

        let entry = AllowListEntry {
            address: claimant,
            units: U256::from(50u64),
        };
        let list_root = ingest_allow_list(&store, None, vec![entry]).await.unwrap();

        applier
            .apply_batch(&[StampedFact::new(
                position(1, 0),
                Fact::AllowListRooted {
                    token_id: root(),
                    root: list_root,
                },
            )])
            .await
            .unwrap();

        let claim_fact = StampedFact::new(
            position(2, 0),
            Fact::LeafClaimed {
                token_id: root(),
                leaf: leaf_hash(&entry),
                claimant,
            },
        );

        let first = applier.apply_batch(&[claim_fact.clone()]).await.unwrap();
        assert_eq!((first.applied, first.dropped), (1, 0));

        // Duplicate delivery: no error, no second record.
        let second = applier.apply_batch(&[claim_fact]).await.unwrap();
        assert_eq!((second.applied, second.dropped), (1, 0));

        // A leaf nobody was allowed: dropped, batch survives.
        let missing = applier
            .apply_batch(&[StampedFact::new(
                position(3, 0),
                Fact::LeafClaimed {
                    token_id: root(),
                    leaf: alloy_primitives::B256::with_last_byte(0xFF),
                    claimant,
                },
            )])
            .await
            .unwrap();
        assert_eq!((missing.applied, missing.dropped), (0, 1));
    }
}
