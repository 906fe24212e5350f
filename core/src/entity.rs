//! Rows of the derived-state store, in their typed in-process form.
//!
//! Each entity names its natural key; the storage gateway uses that key as
//! the upsert conflict target so re-delivery of an on-chain event converges
//! on the same row.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Block metadata stamped on rows as they are created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub number: u64,
    pub timestamp: u64,
}

/// An inclusive `[from, to]` block range planned for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

impl std::fmt::Display for BlockWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// A deployed contract under indexing. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub id: i64,
    pub chain_id: u64,
    pub contract_address: Address,
    pub start_block: u64,
}

/// A (contract, event) subscription with its own indexing cursor.
///
/// `last_block_indexed` is the sole resumption point after a restart and is
/// only advanced after a batch fully commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEvent {
    pub contract: Contract,
    pub events_id: i64,
    pub event_name: String,
    pub last_block_indexed: Option<u64>,
}

/// A unit-bearing asset. Natural key: `(contracts_id, token_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub contracts_id: i64,
    pub token_id: U256,
    pub hypercert_id: String,
    pub creator_address: Option<Address>,
    pub owner_address: Option<Address>,
    pub units: U256,
    pub uri: Option<String>,
    pub creation_block: Option<BlockStamp>,
    pub last_update_block: Option<BlockStamp>,
}

/// A partition of a claim's units. Natural key: `(claims_id, token_id)`.
///
/// Burned fractions stay in the store with zero units; rows are never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fraction {
    pub claims_id: i64,
    pub token_id: U256,
    pub owner_address: Option<Address>,
    pub units: U256,
    pub creation_block: Option<BlockStamp>,
    pub last_update_block: Option<BlockStamp>,
}

/// Serialized allow-list tree plus its root. Keyed by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListData {
    pub id: i64,
    pub uri: Option<String>,
    pub root: B256,
    pub data: serde_json::Value,
    /// Whether the tree has been expanded into per-leaf records.
    pub parsed: bool,
}

/// One allow-list leaf. Natural key: `(allow_list_data_id, entry)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListRecord {
    pub allow_list_data_id: i64,
    pub entry: u64,
    pub leaf: B256,
    pub user_address: Address,
    pub units: U256,
    pub proof: Vec<B256>,
    pub claimed: bool,
}

/// An attestation schema with its own indexing cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedSchema {
    pub id: i64,
    pub chain_id: u64,
    pub uid: B256,
    pub schema: Option<String>,
    pub resolver: Option<Address>,
    pub revocable: bool,
    pub last_block_indexed: Option<u64>,
}

/// A decoded claim evaluation. Natural key: `(supported_schemas_id, uid)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub supported_schemas_id: i64,
    pub uid: B256,
    pub chain_id: u64,
    pub contract_address: Address,
    pub token_id: U256,
    pub recipient: Address,
    pub attester: Address,
    pub data: serde_json::Value,
    pub block: BlockStamp,
}

/// An executed marketplace fill. Natural key: `(transaction_hash, log_index)`
/// so batch transactions with several fills stay distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub buyer: Address,
    pub seller: Address,
    pub strategy_id: u64,
    pub currency: Address,
    pub collection: Address,
    pub item_ids: Vec<U256>,
    pub amounts: Vec<U256>,
    pub hypercert_id: String,
    pub fee_recipients: Vec<Address>,
    pub fee_amounts: Vec<U256>,
    pub block: BlockStamp,
}

/// An open marketplace order subject to re-validation after fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceOrder {
    pub id: String,
    pub chain_id: u64,
    pub signer: Address,
    pub collection: Address,
    pub item_ids: Vec<U256>,
    pub order_nonce: U256,
    pub invalidated: bool,
    pub validator_codes: Vec<u64>,
}
