use alloy_primitives::{keccak256, Address, B256, U256};
use error_stack::{Report, Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::MerkleError;

/// One allow-list entry: an address pre-authorized to claim `units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowListEntry {
    pub address: Address,
    pub units: U256,
}

/// A leaf expanded for persistence: its position in the original entry
/// list, its hash, and the sibling path proving membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedLeaf {
    pub entry: u64,
    pub leaf: B256,
    pub address: Address,
    pub units: U256,
    pub proof: Vec<B256>,
}

/// Complete binary Merkle tree in the `standard-v1` layout.
///
/// The node array holds `2n - 1` hashes with the root at index 0 and the
/// leaves, sorted by hash, in the last `n` positions. Values keep their
/// original entry order and remember the tree index of their leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardMerkleTree {
    nodes: Vec<B256>,
    values: Vec<(AllowListEntry, usize)>,
}

/// Serialized form, compatible with the OpenZeppelin JS dump so trees
/// produced off-chain parse unchanged.
#[derive(Serialize, Deserialize)]
struct Dump {
    format: String,
    #[serde(rename = "leafEncoding")]
    leaf_encoding: Vec<String>,
    tree: Vec<String>,
    values: Vec<DumpValue>,
}

#[derive(Serialize, Deserialize)]
struct DumpValue {
    value: (String, String),
    #[serde(rename = "treeIndex")]
    tree_index: usize,
}

const FORMAT: &str = "standard-v1";
const LEAF_ENCODING: [&str; 2] = ["address", "uint256"];

/// Double-keccak leaf hash over the ABI encoding of `(address, uint256)`.
pub fn leaf_hash(entry: &AllowListEntry) -> B256 {
    // abi.encode(address, uint256): both arguments are static, so the
    // encoding is two 32-byte words.
    let mut encoded = [0u8; 64];
    encoded[12..32].copy_from_slice(entry.address.as_slice());
    encoded[32..64].copy_from_slice(&entry.units.to_be_bytes::<32>());
    keccak256(keccak256(encoded))
}

fn hash_pair(a: &B256, b: &B256) -> B256 {
    let mut buf = [0u8; 64];
    if a.as_slice() <= b.as_slice() {
        buf[..32].copy_from_slice(a.as_slice());
        buf[32..].copy_from_slice(b.as_slice());
    } else {
        buf[..32].copy_from_slice(b.as_slice());
        buf[32..].copy_from_slice(a.as_slice());
    }
    keccak256(buf)
}

fn sibling_index(i: usize) -> usize {
    if i % 2 == 0 {
        i - 1
    } else {
        i + 1
    }
}

impl StandardMerkleTree {
    /// Builds the tree from entries in allow-list order.
    pub fn from_entries(entries: Vec<AllowListEntry>) -> Result<Self, MerkleError> {
        if entries.is_empty() {
            return Err(Report::new(MerkleError::Empty));
        }

        let n = entries.len();
        let mut hashed: Vec<(usize, B256)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, leaf_hash(entry)))
            .collect();
        hashed.sort_by(|a, b| a.1.as_slice().cmp(b.1.as_slice()));

        let mut nodes = vec![B256::ZERO; 2 * n - 1];
        let mut values: Vec<(AllowListEntry, usize)> =
            entries.into_iter().map(|entry| (entry, 0)).collect();

        for (position, (original, hash)) in hashed.iter().enumerate() {
            let tree_index = nodes.len() - 1 - position;
            nodes[tree_index] = *hash;
            values[*original].1 = tree_index;
        }

        for i in (0..nodes.len() - n).rev() {
            nodes[i] = hash_pair(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }

        Ok(Self { nodes, values })
    }

    pub fn root(&self) -> B256 {
        self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in their original allow-list order.
    pub fn entries(&self) -> impl Iterator<Item = &AllowListEntry> {
        self.values.iter().map(|(entry, _)| entry)
    }

    /// Sibling path for the entry at the given original index.
    pub fn proof(&self, index: usize) -> Result<Vec<B256>, MerkleError> {
        let (_, mut tree_index) = *self
            .values
            .get(index)
            .ok_or(MerkleError::Parse)
            .attach_printable_lazy(|| format!("no value at index {index}"))?;

        let mut proof = Vec::new();
        while tree_index > 0 {
            proof.push(self.nodes[sibling_index(tree_index)]);
            tree_index = (tree_index - 1) / 2;
        }
        Ok(proof)
    }

    /// Verifies a proof against a root, the way the on-chain verifier does.
    pub fn verify(root: B256, leaf: B256, proof: &[B256]) -> bool {
        let computed = proof.iter().fold(leaf, |acc, node| hash_pair(&acc, node));
        computed == root
    }

    /// Expands every leaf into its persistable record form.
    pub fn expand(&self) -> Result<Vec<ExpandedLeaf>, MerkleError> {
        let mut leaves = Vec::with_capacity(self.values.len());
        for (index, (entry, tree_index)) in self.values.iter().enumerate() {
            leaves.push(ExpandedLeaf {
                entry: index as u64,
                leaf: self.nodes[*tree_index],
                address: entry.address,
                units: entry.units,
                proof: self.proof(index)?,
            });
        }
        Ok(leaves)
    }

    /// Serializes the tree to its JSON dump.
    pub fn to_json(&self) -> serde_json::Value {
        let dump = Dump {
            format: FORMAT.to_string(),
            leaf_encoding: LEAF_ENCODING.iter().map(|s| s.to_string()).collect(),
            tree: self
                .nodes
                .iter()
                .map(|node| format!("0x{}", hex::encode(node)))
                .collect(),
            values: self
                .values
                .iter()
                .map(|(entry, tree_index)| DumpValue {
                    value: (entry.address.to_checksum(None), entry.units.to_string()),
                    tree_index: *tree_index,
                })
                .collect(),
        };
        serde_json::to_value(dump).expect("dump serialization is infallible")
    }

    /// Parses a JSON dump back into a tree.
    pub fn from_json(blob: &serde_json::Value) -> Result<Self, MerkleError> {
        let dump: Dump = serde_json::from_value(blob.clone())
            .change_context(MerkleError::Parse)
            .attach_printable("not a merkle tree dump")?;

        if dump.format != FORMAT {
            return Err(Report::new(MerkleError::Format))
                .attach_printable_lazy(|| format!("format: {}", dump.format));
        }
        if dump.leaf_encoding != LEAF_ENCODING {
            return Err(Report::new(MerkleError::Format))
                .attach_printable_lazy(|| format!("leaf encoding: {:?}", dump.leaf_encoding));
        }

        let mut nodes = Vec::with_capacity(dump.tree.len());
        for node in &dump.tree {
            let node = node
                .parse::<B256>()
                .change_context(MerkleError::Parse)
                .attach_printable("malformed tree node")?;
            nodes.push(node);
        }

        let mut values = Vec::with_capacity(dump.values.len());
        for value in &dump.values {
            let address = value
                .value
                .0
                .parse::<Address>()
                .change_context(MerkleError::Parse)
                .attach_printable("malformed leaf address")?;
            let units = value
                .value
                .1
                .parse::<U256>()
                .change_context(MerkleError::Parse)
                .attach_printable("malformed leaf units")?;
            if value.tree_index >= nodes.len() {
                return Err(Report::new(MerkleError::Parse))
                    .attach_printable_lazy(|| format!("tree index {} out of range", value.tree_index));
            }
            values.push((AllowListEntry { address, units }, value.tree_index));
        }

        if values.is_empty() || nodes.len() != 2 * values.len() - 1 {
            return Err(Report::new(MerkleError::Parse)).attach_printable("inconsistent node count");
        }

        Ok(Self { nodes, values })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use assert_matches::assert_matches;

    use crate::MerkleError;

    use super::{leaf_hash, AllowListEntry, StandardMerkleTree};

    fn entries(n: u64) -> Vec<AllowListEntry> {
        (0..n)
            .map(|i| AllowListEntry {
                address: Address::with_last_byte((i + 1) as u8),
                units: U256::from(100 * (i + 1)),
            })
            .collect()
    }

    #[test]
    fn test_empty_rejected() {
        let result = StandardMerkleTree::from_entries(vec![]);
        assert_matches!(
            result.unwrap_err().current_context(),
            MerkleError::Empty
        );
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let items = entries(1);
        let tree = StandardMerkleTree::from_entries(items.clone()).unwrap();
        assert_eq!(tree.root(), leaf_hash(&items[0]));
        assert!(tree.proof(0).unwrap().is_empty());
    }

    #[test]
    fn test_deterministic_construction() {
        let a = StandardMerkleTree::from_entries(entries(7)).unwrap();
        let b = StandardMerkleTree::from_entries(entries(7)).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_proofs_verify() {
        let items = entries(13);
        let tree = StandardMerkleTree::from_entries(items.clone()).unwrap();
        for (i, entry) in items.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(StandardMerkleTree::verify(
                tree.root(),
                leaf_hash(entry),
                &proof
            ));
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let items = entries(8);
        let tree = StandardMerkleTree::from_entries(items.clone()).unwrap();
        let mut proof = tree.proof(3).unwrap();
        proof[0] = leaf_hash(&items[0]);
        assert!(!StandardMerkleTree::verify(
            tree.root(),
            leaf_hash(&items[3]),
            &proof
        ));
    }

    #[test]
    fn test_json_round_trip_reproduces_hashes() {
        let tree = StandardMerkleTree::from_entries(entries(21)).unwrap();
        let blob = tree.to_json();
        let parsed = StandardMerkleTree::from_json(&blob).unwrap();

        assert_eq!(parsed.root(), tree.root());
        let original = tree.expand().unwrap();
        let reparsed = parsed.expand().unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_expand_preserves_entry_order() {
        let items = entries(5);
        let tree = StandardMerkleTree::from_entries(items.clone()).unwrap();
        let expanded = tree.expand().unwrap();
        for (i, leaf) in expanded.iter().enumerate() {
            assert_eq!(leaf.entry, i as u64);
            assert_eq!(leaf.address, items[i].address);
            assert_eq!(leaf.units, items[i].units);
            assert_eq!(leaf.leaf, leaf_hash(&items[i]));
        }
    }

    #[test]
    fn test_unknown_format_rejected() {
        let tree = StandardMerkleTree::from_entries(entries(3)).unwrap();
        let mut blob = tree.to_json();
        blob["format"] = serde_json::json!("custom-v2");
        let result = StandardMerkleTree::from_json(&blob);
        assert_matches!(
            result.unwrap_err().current_context(),
            MerkleError::Format
        );
    }
}
