//! Allow-list Merkle trees.
//!
//! Trees are built over `(address, units)` leaves with the `standard-v1`
//! layout the indexed contracts verify proofs against: leaf hash is the
//! double keccak of the ABI-encoded pair, internal nodes hash their sorted
//! children. Building the same entry list always reproduces the same root,
//! leaf hashes, and proofs.

mod tree;

pub use tree::{leaf_hash, AllowListEntry, ExpandedLeaf, StandardMerkleTree};

#[derive(Debug)]
pub enum MerkleError {
    /// The entry list is empty; a tree needs at least one leaf.
    Empty,
    /// The serialized blob is not a standard-v1 dump.
    Format,
    /// The serialized blob could not be decoded.
    Parse,
}

impl error_stack::Context for MerkleError {}

impl std::fmt::Display for MerkleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MerkleError::Empty => write!(f, "cannot build a tree without leaves"),
            MerkleError::Format => write!(f, "unsupported merkle tree format"),
            MerkleError::Parse => write!(f, "failed to parse merkle tree"),
        }
    }
}
