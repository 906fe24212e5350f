//! In-memory store backend.
//!
//! Implements the same upsert-on-natural-key semantics as the Postgres
//! backend. Backs the ledger and orchestrator tests and local dry runs; not
//! durable.

use std::sync::Mutex;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use error_stack::Result;

use hypercerts_core::{
    entity::BlockStamp, token, AllowListData, AllowListRecord, Attestation, Claim, Contract,
    ContractEvent, Fraction, MarketplaceOrder, Sale, SupportedSchema,
};

use crate::store::{HypercertsStore, LeafClaimOutcome, StoreError};

#[derive(Default)]
struct Inner {
    contracts: Vec<Contract>,
    contract_events: Vec<ContractEvent>,
    supported_schemas: Vec<SupportedSchema>,
    claims: Vec<(i64, Claim)>,
    fractions: Vec<Fraction>,
    allow_lists: Vec<AllowListData>,
    claim_allow_lists: Vec<(i64, i64)>,
    allow_list_records: Vec<AllowListRecord>,
    attestations: Vec<Attestation>,
    sales: Vec<Sale>,
    orders: Vec<MarketplaceOrder>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract and returns its id.
    pub fn register_contract(&self, chain_id: u64, address: Address, start_block: u64) -> i64 {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(contract) = inner
            .contracts
            .iter()
            .find(|c| c.chain_id == chain_id && c.contract_address == address)
        {
            return contract.id;
        }
        let id = inner.fresh_id();
        inner.contracts.push(Contract {
            id,
            chain_id,
            contract_address: address,
            start_block,
        });
        id
    }

    /// Subscribes a contract to an event and returns the events id.
    pub fn register_contract_event(&self, contract: Contract, event_name: &str) -> i64 {
        let mut inner = self.inner.lock().expect("store lock");
        let events_id = inner.fresh_id();
        inner.contract_events.push(ContractEvent {
            contract,
            events_id,
            event_name: event_name.to_string(),
            last_block_indexed: None,
        });
        events_id
    }

    pub fn register_supported_schema(&self, schema: SupportedSchema) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.supported_schemas.push(schema);
    }

    pub fn register_order(&self, order: MarketplaceOrder) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.orders.push(order);
    }

    pub fn sales(&self) -> Vec<Sale> {
        self.inner.lock().expect("store lock").sales.clone()
    }

    pub fn attestations(&self) -> Vec<Attestation> {
        self.inner.lock().expect("store lock").attestations.clone()
    }

    pub fn orders(&self) -> Vec<MarketplaceOrder> {
        self.inner.lock().expect("store lock").orders.clone()
    }

    pub fn allow_list_records(&self, allow_list_data_id: i64) -> Vec<AllowListRecord> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .allow_list_records
            .iter()
            .filter(|r| r.allow_list_data_id == allow_list_data_id)
            .cloned()
            .collect()
    }
}

impl Inner {
    fn fresh_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn contract_for(&self, chain_id: u64, address: Address) -> Option<Contract> {
        self.contracts
            .iter()
            .find(|c| c.chain_id == chain_id && c.contract_address == address)
            .cloned()
    }
}

#[async_trait]
impl HypercertsStore for MemoryStore {
    async fn list_contract_events(&self, chain_id: u64) -> Result<Vec<ContractEvent>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .contract_events
            .iter()
            .filter(|pair| pair.contract.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn update_contract_event_cursor(
        &self,
        contracts_id: i64,
        events_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for pair in inner.contract_events.iter_mut() {
            if pair.contract.id == contracts_id && pair.events_id == events_id {
                // Cursors never move backwards.
                let current = pair.last_block_indexed.unwrap_or(0);
                pair.last_block_indexed = Some(u64::max(current, last_block_indexed));
            }
        }
        Ok(())
    }

    async fn list_supported_schemas(
        &self,
        chain_id: u64,
    ) -> Result<Vec<SupportedSchema>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .supported_schemas
            .iter()
            .filter(|schema| schema.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn find_supported_schema(
        &self,
        chain_id: u64,
        uid: B256,
    ) -> Result<Option<SupportedSchema>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .supported_schemas
            .iter()
            .find(|schema| schema.chain_id == chain_id && schema.uid == uid)
            .cloned())
    }

    async fn update_supported_schema_cursor(
        &self,
        supported_schemas_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for schema in inner.supported_schemas.iter_mut() {
            if schema.id == supported_schemas_id {
                let current = schema.last_block_indexed.unwrap_or(0);
                schema.last_block_indexed = Some(u64::max(current, last_block_indexed));
            }
        }
        Ok(())
    }

    async fn get_or_create_claim(
        &self,
        chain_id: u64,
        contract_address: Address,
        token_id: U256,
        stamp: BlockStamp,
    ) -> Result<i64, StoreError> {
        let root = token::claim_token_id(token_id);
        let mut inner = self.inner.lock().expect("store lock");

        let contract = match inner.contract_for(chain_id, contract_address) {
            Some(contract) => contract,
            None => {
                let id = inner.fresh_id();
                let contract = Contract {
                    id,
                    chain_id,
                    contract_address,
                    start_block: 0,
                };
                inner.contracts.push(contract.clone());
                contract
            }
        };

        if let Some((id, _)) = inner
            .claims
            .iter()
            .find(|(_, claim)| claim.contracts_id == contract.id && claim.token_id == root)
        {
            return Ok(*id);
        }

        let id = inner.fresh_id();
        inner.claims.push((
            id,
            Claim {
                contracts_id: contract.id,
                token_id: root,
                hypercert_id: token::hypercert_id(chain_id, contract_address, root),
                creator_address: None,
                owner_address: None,
                units: U256::ZERO,
                uri: None,
                creation_block: Some(stamp),
                last_update_block: Some(stamp),
            },
        ));
        Ok(id)
    }

    async fn upsert_claim(&self, claim: Claim) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some((id, existing)) = inner
            .claims
            .iter_mut()
            .find(|(_, c)| c.contracts_id == claim.contracts_id && c.token_id == claim.token_id)
        {
            // Same coalescing as the Postgres upsert: absent values keep
            // the stored ones, creation stamps are first-writer-wins.
            let creation = existing.creation_block.or(claim.creation_block);
            let creator = claim.creator_address.or(existing.creator_address);
            let owner = claim.owner_address.or(existing.owner_address);
            let uri = claim.uri.clone().or(existing.uri.take());
            *existing = Claim {
                creation_block: creation,
                creator_address: creator,
                owner_address: owner,
                uri,
                ..claim
            };
            return Ok(*id);
        }
        let id = inner.fresh_id();
        inner.claims.push((id, claim));
        Ok(id)
    }

    async fn get_claim(
        &self,
        contracts_id: i64,
        token_id: U256,
    ) -> Result<Option<(i64, Claim)>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .claims
            .iter()
            .find(|(_, c)| c.contracts_id == contracts_id && c.token_id == token_id)
            .map(|(id, c)| (*id, c.clone())))
    }

    async fn set_claim_owner(
        &self,
        claims_id: i64,
        owner: Address,
        stamp: BlockStamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for (id, claim) in inner.claims.iter_mut() {
            if *id == claims_id {
                claim.owner_address = Some(owner);
                claim.last_update_block = Some(stamp);
            }
        }
        Ok(())
    }

    async fn get_fraction(
        &self,
        claims_id: i64,
        token_id: U256,
    ) -> Result<Option<Fraction>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .fractions
            .iter()
            .find(|f| f.claims_id == claims_id && f.token_id == token_id)
            .cloned())
    }

    async fn upsert_fractions(&self, fractions: Vec<Fraction>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for fraction in fractions {
            if let Some(existing) = inner
                .fractions
                .iter_mut()
                .find(|f| f.claims_id == fraction.claims_id && f.token_id == fraction.token_id)
            {
                let creation = existing.creation_block.or(fraction.creation_block);
                let owner = fraction.owner_address.or(existing.owner_address);
                *existing = Fraction {
                    creation_block: creation,
                    owner_address: owner,
                    ..fraction
                };
            } else {
                inner.fractions.push(fraction);
            }
        }
        Ok(())
    }

    async fn fractions_for_claim(&self, claims_id: i64) -> Result<Vec<Fraction>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .fractions
            .iter()
            .filter(|f| f.claims_id == claims_id)
            .cloned()
            .collect())
    }

    async fn upsert_allow_list_data(
        &self,
        root: B256,
        uri: Option<String>,
        data: serde_json::Value,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(existing) = inner.allow_lists.iter_mut().find(|a| a.root == root) {
            existing.uri = uri.or(existing.uri.take());
            existing.data = data;
            return Ok(existing.id);
        }
        let id = inner.fresh_id();
        inner.allow_lists.push(AllowListData {
            id,
            uri,
            root,
            data,
            parsed: false,
        });
        Ok(id)
    }

    async fn find_allow_list_by_root(
        &self,
        root: B256,
    ) -> Result<Option<AllowListData>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.allow_lists.iter().find(|a| a.root == root).cloned())
    }

    async fn link_claim_allow_list(
        &self,
        claims_id: i64,
        allow_list_data_id: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if !inner
            .claim_allow_lists
            .contains(&(claims_id, allow_list_data_id))
        {
            inner.claim_allow_lists.push((claims_id, allow_list_data_id));
        }
        Ok(())
    }

    async fn allow_list_for_claim(
        &self,
        claims_id: i64,
    ) -> Result<Option<AllowListData>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let Some((_, allow_list_data_id)) = inner
            .claim_allow_lists
            .iter()
            .find(|(claim, _)| *claim == claims_id)
        else {
            return Ok(None);
        };
        Ok(inner
            .allow_lists
            .iter()
            .find(|a| a.id == *allow_list_data_id)
            .cloned())
    }

    async fn insert_allow_list_records(
        &self,
        records: Vec<AllowListRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for record in records {
            if let Some(existing) = inner.allow_list_records.iter_mut().find(|r| {
                r.allow_list_data_id == record.allow_list_data_id && r.entry == record.entry
            }) {
                // A re-parse must not lose a claimed flag that already
                // transitioned.
                let claimed = existing.claimed || record.claimed;
                *existing = AllowListRecord { claimed, ..record };
            } else {
                inner.allow_list_records.push(record);
            }
        }
        Ok(())
    }

    async fn mark_allow_list_parsed(&self, allow_list_data_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for allow_list in inner.allow_lists.iter_mut() {
            if allow_list.id == allow_list_data_id {
                allow_list.parsed = true;
            }
        }
        Ok(())
    }

    async fn mark_leaf_claimed(
        &self,
        allow_list_data_id: i64,
        leaf: B256,
        claimant: Address,
    ) -> Result<LeafClaimOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let mut already_claimed = false;
        for record in inner.allow_list_records.iter_mut() {
            if record.allow_list_data_id != allow_list_data_id
                || record.leaf != leaf
                || record.user_address != claimant
            {
                continue;
            }
            if record.claimed {
                already_claimed = true;
                continue;
            }
            record.claimed = true;
            return Ok(LeafClaimOutcome::Claimed);
        }
        if already_claimed {
            return Ok(LeafClaimOutcome::AlreadyClaimed);
        }
        Ok(LeafClaimOutcome::NoMatch)
    }

    async fn upsert_attestation(&self, attestation: Attestation) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(existing) = inner.attestations.iter_mut().find(|a| {
            a.supported_schemas_id == attestation.supported_schemas_id && a.uid == attestation.uid
        }) {
            *existing = attestation;
        } else {
            inner.attestations.push(attestation);
        }
        Ok(())
    }

    async fn upsert_sale(&self, sale: Sale) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(existing) = inner.sales.iter_mut().find(|s| {
            s.transaction_hash == sale.transaction_hash && s.log_index == sale.log_index
        }) {
            *existing = sale;
        } else {
            inner.sales.push(sale);
        }
        Ok(())
    }

    async fn list_open_orders_overlapping(
        &self,
        chain_id: u64,
        item_ids: &[U256],
    ) -> Result<Vec<MarketplaceOrder>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .orders
            .iter()
            .filter(|order| {
                order.chain_id == chain_id
                    && !order.invalidated
                    && order.item_ids.iter().any(|id| item_ids.contains(id))
            })
            .cloned()
            .collect())
    }

    async fn invalidate_order(
        &self,
        order_id: &str,
        validator_codes: Vec<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        for order in inner.orders.iter_mut() {
            if order.id == order_id {
                order.invalidated = true;
                order.validator_codes = validator_codes.clone();
            }
        }
        Ok(())
    }
}
