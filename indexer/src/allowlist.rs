//! Allow-list ingestion and expansion.
//!
//! A claim's allow-list arrives in two halves: the on-chain
//! `AllowlistCreated` event carries only the root, while the tree itself is
//! distributed off-chain. Whichever half arrives first, the store converges
//! on one `allow_list_data` row keyed by root, and the tree is expanded
//! into one record per leaf exactly once.

use error_stack::{Result, ResultExt};
use tracing::info;

use alloy_primitives::B256;

use hypercerts_core::{AllowListData, AllowListRecord};
use hypercerts_merkle::{AllowListEntry, StandardMerkleTree};
use hypercerts_storage::HypercertsStore;

use crate::error::IndexerError;

/// Stores an off-chain-distributed allow-list blob: persists the serialized
/// tree and expands it into per-leaf records. Returns the root.
pub async fn ingest_allow_list(
    store: &dyn HypercertsStore,
    uri: Option<String>,
    entries: Vec<AllowListEntry>,
) -> Result<B256, IndexerError> {
    let tree = StandardMerkleTree::from_entries(entries)
        .change_context(IndexerError::Validation)
        .attach_printable("allow list does not build a tree")?;
    let root = tree.root();

    let allow_list_data_id = store
        .upsert_allow_list_data(root, uri, tree.to_json())
        .await
        .change_context(IndexerError::Temporary)?;

    expand_into_records(store, allow_list_data_id, &tree).await?;
    info!(root = %root, leaves = tree.len(), "allow list ingested");
    Ok(root)
}

/// Expands a stored allow-list blob into records if that has not happened
/// yet. Claim marking needs the per-leaf rows.
pub async fn ensure_parsed(
    store: &dyn HypercertsStore,
    allow_list: &AllowListData,
) -> Result<(), IndexerError> {
    if allow_list.parsed {
        return Ok(());
    }
    if allow_list.data.is_null() {
        // Root seen on chain but the blob has not been delivered yet.
        return Err(IndexerError::Consistency)
            .attach_printable("allow list has no stored tree data")
            .attach_printable(format!("root: {}", allow_list.root));
    }

    let tree = StandardMerkleTree::from_json(&allow_list.data)
        .change_context(IndexerError::Validation)
        .attach_printable("stored allow list blob does not parse")?;

    expand_into_records(store, allow_list.id, &tree).await
}

async fn expand_into_records(
    store: &dyn HypercertsStore,
    allow_list_data_id: i64,
    tree: &StandardMerkleTree,
) -> Result<(), IndexerError> {
    let leaves = tree
        .expand()
        .change_context(IndexerError::Validation)
        .attach_printable("failed to expand allow list tree")?;

    let records = leaves
        .into_iter()
        .map(|leaf| AllowListRecord {
            allow_list_data_id,
            entry: leaf.entry,
            leaf: leaf.leaf,
            user_address: leaf.address,
            units: leaf.units,
            proof: leaf.proof,
            claimed: false,
        })
        .collect();

    store
        .insert_allow_list_records(records)
        .await
        .change_context(IndexerError::Temporary)?;
    store
        .mark_allow_list_parsed(allow_list_data_id)
        .await
        .change_context(IndexerError::Temporary)?;
    Ok(())
}
