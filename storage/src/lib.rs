//! Persistence for the derived domain state.
//!
//! All writes are upserts on each entity's natural key, so re-applying an
//! already-applied window converges on identical rows. Nothing is ever
//! deleted; burns and unclaims are zero/false states.

pub mod memory;
pub mod postgres;
mod store;

pub use memory::MemoryStore;
pub use postgres::{PostgresStore, PostgresStoreError, PostgresStoreOptions, TlsConfiguration};
pub use store::{HypercertsStore, LeafClaimOutcome, StoreError};
