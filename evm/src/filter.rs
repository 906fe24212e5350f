use alloy_dyn_abi::{DecodedEvent, EventExt};
use alloy_json_abi::Event;
use alloy_primitives::{Address, B256};
use alloy_rpc_types::{Filter, Log};
use error_stack::{Report, Result, ResultExt};

use hypercerts_core::BlockWindow;

#[derive(Debug)]
pub enum FilterError {
    /// The event signature string could not be parsed.
    Signature,
    /// A fetched log does not decode against the event's ABI.
    Decode,
}

/// A per-event log filter derived from a human-readable event signature,
/// e.g. `event ClaimStored(uint256 indexed claimID, string uri, uint256
/// totalUnits)`.
#[derive(Debug, Clone)]
pub struct EventFilter {
    event: Event,
    topic0: B256,
}

impl EventFilter {
    pub fn parse(signature: &str) -> Result<Self, FilterError> {
        let event = Event::parse(signature)
            .change_context(FilterError::Signature)
            .attach_printable_lazy(|| format!("signature: {signature}"))?;

        if event.anonymous {
            return Err(Report::new(FilterError::Signature))
                .attach_printable("anonymous events cannot be filtered by signature");
        }

        let topic0 = event.selector();
        Ok(Self { event, topic0 })
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }

    pub fn topic0(&self) -> B256 {
        self.topic0
    }

    /// The RPC filter for one contract over one block window.
    pub fn to_filter(&self, address: Address, window: BlockWindow) -> Filter {
        Filter::new()
            .address(address)
            .event_signature(self.topic0)
            .from_block(window.from)
            .to_block(window.to)
    }

    /// Decodes a fetched log against the event's ABI, validating indexed
    /// and body fields.
    pub fn decode_log(&self, log: &Log) -> Result<DecodedEvent, FilterError> {
        self.event
            .decode_log(&log.inner.data, true)
            .change_context(FilterError::Decode)
            .attach_printable_lazy(|| format!("event: {}", self.event.name))
    }
}

impl error_stack::Context for FilterError {}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::Signature => write!(f, "invalid event signature"),
            FilterError::Decode => write!(f, "log does not match event ABI"),
        }
    }
}
