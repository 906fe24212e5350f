use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use error_stack::Result;

use hypercerts_core::{
    entity::BlockStamp, AllowListData, AllowListRecord, Attestation, Claim, ContractEvent,
    Fraction, MarketplaceOrder, Sale, SupportedSchema,
};

#[derive(Debug)]
pub enum StoreError {
    /// The store is unreachable or the query failed; retryable.
    Connection,
    /// The query executed but returned something the caller cannot use.
    Query,
    /// A stored value does not parse back into its typed form.
    Corruption,
}

impl error_stack::Context for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection => write!(f, "store connection failed"),
            StoreError::Query => write!(f, "store query failed"),
            StoreError::Corruption => write!(f, "stored value is corrupted"),
        }
    }
}

/// Result of marking an allow-list leaf claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafClaimOutcome {
    /// The unclaimed record was found and flipped.
    Claimed,
    /// Only an already-claimed matching record exists: duplicate delivery.
    AlreadyClaimed,
    /// No matching record at all: a consistency fault.
    NoMatch,
}

/// Typed gateway to the relational store.
///
/// Natural keys are the upsert conflict targets throughout: claims
/// `(contracts_id, token_id)`, fractions `(claims_id, token_id)`,
/// allow-list records `(allow_list_data_id, entry)`, attestations
/// `(supported_schemas_id, uid)`, sales `(transaction_hash, log_index)`.
/// Conflicting rows are updated, not skipped.
#[async_trait]
pub trait HypercertsStore: Send + Sync {
    // Registrations and cursors.

    /// All (contract, event) pairs registered for the chain.
    async fn list_contract_events(&self, chain_id: u64) -> Result<Vec<ContractEvent>, StoreError>;

    /// Advances a pair's cursor. Called only after a batch fully commits.
    async fn update_contract_event_cursor(
        &self,
        contracts_id: i64,
        events_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError>;

    async fn list_supported_schemas(&self, chain_id: u64)
        -> Result<Vec<SupportedSchema>, StoreError>;

    async fn find_supported_schema(
        &self,
        chain_id: u64,
        uid: B256,
    ) -> Result<Option<SupportedSchema>, StoreError>;

    async fn update_supported_schema_cursor(
        &self,
        supported_schemas_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError>;

    // Claims and fractions.

    /// Resolves the claim row for a root token id, creating it if absent.
    /// Concurrent callers converge on one row.
    async fn get_or_create_claim(
        &self,
        chain_id: u64,
        contract_address: Address,
        token_id: U256,
        stamp: BlockStamp,
    ) -> Result<i64, StoreError>;

    async fn upsert_claim(&self, claim: Claim) -> Result<i64, StoreError>;

    /// The claim row and its id, if present.
    async fn get_claim(
        &self,
        contracts_id: i64,
        token_id: U256,
    ) -> Result<Option<(i64, Claim)>, StoreError>;

    async fn set_claim_owner(
        &self,
        claims_id: i64,
        owner: Address,
        stamp: BlockStamp,
    ) -> Result<(), StoreError>;

    async fn get_fraction(
        &self,
        claims_id: i64,
        token_id: U256,
    ) -> Result<Option<Fraction>, StoreError>;

    async fn upsert_fractions(&self, fractions: Vec<Fraction>) -> Result<(), StoreError>;

    async fn fractions_for_claim(&self, claims_id: i64) -> Result<Vec<Fraction>, StoreError>;

    // Allow lists.

    /// Stores the serialized tree, keyed by its root. Returns the row id.
    async fn upsert_allow_list_data(
        &self,
        root: B256,
        uri: Option<String>,
        data: serde_json::Value,
    ) -> Result<i64, StoreError>;

    async fn find_allow_list_by_root(
        &self,
        root: B256,
    ) -> Result<Option<AllowListData>, StoreError>;

    async fn link_claim_allow_list(
        &self,
        claims_id: i64,
        allow_list_data_id: i64,
    ) -> Result<(), StoreError>;

    async fn allow_list_for_claim(
        &self,
        claims_id: i64,
    ) -> Result<Option<AllowListData>, StoreError>;

    async fn insert_allow_list_records(
        &self,
        records: Vec<AllowListRecord>,
    ) -> Result<(), StoreError>;

    async fn mark_allow_list_parsed(&self, allow_list_data_id: i64) -> Result<(), StoreError>;

    /// Flips the matching unclaimed record's `claimed` flag. The false→true
    /// transition happens at most once per record.
    async fn mark_leaf_claimed(
        &self,
        allow_list_data_id: i64,
        leaf: B256,
        claimant: Address,
    ) -> Result<LeafClaimOutcome, StoreError>;

    // Attestations.

    async fn upsert_attestation(&self, attestation: Attestation) -> Result<(), StoreError>;

    // Marketplace.

    async fn upsert_sale(&self, sale: Sale) -> Result<(), StoreError>;

    /// Open (non-invalidated) orders touching any of the given item ids.
    async fn list_open_orders_overlapping(
        &self,
        chain_id: u64,
        item_ids: &[U256],
    ) -> Result<Vec<MarketplaceOrder>, StoreError>;

    async fn invalidate_order(
        &self,
        order_id: &str,
        validator_codes: Vec<u64>,
    ) -> Result<(), StoreError>;
}
