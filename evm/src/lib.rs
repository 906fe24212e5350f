//! JSON-RPC access to the indexed chains.
//!
//! Everything here is read-only: the indexer never submits transactions.

pub mod fetcher;
pub mod filter;
pub mod provider;
pub mod reader;

pub use fetcher::{FetchedLog, LogFetchError, LogFetcher, LogSource};
pub use filter::{EventFilter, FilterError};
pub use provider::{JsonRpcProvider, JsonRpcProviderError, JsonRpcProviderOptions};
pub use reader::{ChainReader, ReceiptLog};
