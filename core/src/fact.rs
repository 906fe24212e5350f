//! Typed domain facts produced by the event parsers.
//!
//! A fact is the parsed, validated meaning of one log (or one element of a
//! batch log). Facts are applied to the store in log order; the position
//! carries the ordering key.

use alloy_primitives::{Address, B256, U256};

use crate::entity::{Attestation, Sale};

/// Where in the chain a fact originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl LogPosition {
    /// Ordering key for last-writer-wins reconciliation within a batch.
    pub fn order_key(&self) -> (u64, u64) {
        (self.block_timestamp, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    /// A new claim was minted with the given total supply.
    ClaimStored {
        token_id: U256,
        uri: String,
        total_units: U256,
        creator: Address,
    },
    /// The claim's root token changed hands (initial mint transfer included).
    ClaimTransferred { token_id: U256, to: Address },
    /// A fraction token changed hands; units are untouched.
    FractionTransferred { token_id: U256, to: Address },
    /// Units moved between two fractions of one claim. A zero `from` token
    /// id marks a mint into the target fraction, a zero `to` token id marks
    /// a burn.
    UnitsTransferred {
        claim_token_id: U256,
        from_token_id: U256,
        to_token_id: U256,
        units: U256,
    },
    /// A claim published its allow-list root.
    AllowListRooted { token_id: U256, root: B256 },
    /// An allow-list leaf was claimed on chain.
    LeafClaimed {
        token_id: U256,
        leaf: B256,
        claimant: Address,
    },
    /// An attestation passed schema resolution and decoding.
    Attested(Attestation),
    /// A marketplace fill executed.
    SaleExecuted(Sale),
}

/// A fact together with its chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedFact {
    pub position: LogPosition,
    pub fact: Fact,
}

impl StampedFact {
    pub fn new(position: LogPosition, fact: Fact) -> Self {
        Self { position, fact }
    }
}
