//! The closed set of indexed event kinds.
//!
//! Event dispatch is an exhaustive match over this enum; an event name with
//! no variant is a configuration error at registry-build time, never a
//! runtime fallthrough.

use error_stack::{Report, Result, ResultExt};

use hypercerts_evm::EventFilter;

use crate::error::IndexerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ClaimStored,
    TransferSingle,
    TransferBatch,
    ValueTransfer,
    BatchValueTransfer,
    AllowlistCreated,
    LeafClaimed,
    Attested,
    TakerBid,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::ClaimStored,
        EventKind::TransferSingle,
        EventKind::TransferBatch,
        EventKind::ValueTransfer,
        EventKind::BatchValueTransfer,
        EventKind::AllowlistCreated,
        EventKind::LeafClaimed,
        EventKind::Attested,
        EventKind::TakerBid,
    ];

    pub fn from_name(name: &str) -> Result<Self, IndexerError> {
        let kind = match name {
            "ClaimStored" => EventKind::ClaimStored,
            "TransferSingle" => EventKind::TransferSingle,
            "TransferBatch" => EventKind::TransferBatch,
            "ValueTransfer" => EventKind::ValueTransfer,
            "BatchValueTransfer" => EventKind::BatchValueTransfer,
            "AllowlistCreated" => EventKind::AllowlistCreated,
            "LeafClaimed" => EventKind::LeafClaimed,
            "Attested" => EventKind::Attested,
            "TakerBid" => EventKind::TakerBid,
            other => {
                return Err(Report::new(IndexerError::Configuration))
                    .attach_printable(format!("unknown event name: {other}"))
            }
        };
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ClaimStored => "ClaimStored",
            EventKind::TransferSingle => "TransferSingle",
            EventKind::TransferBatch => "TransferBatch",
            EventKind::ValueTransfer => "ValueTransfer",
            EventKind::BatchValueTransfer => "BatchValueTransfer",
            EventKind::AllowlistCreated => "AllowlistCreated",
            EventKind::LeafClaimed => "LeafClaimed",
            EventKind::Attested => "Attested",
            EventKind::TakerBid => "TakerBid",
        }
    }

    /// The human-readable signature the log filter is derived from.
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::ClaimStored => {
                "event ClaimStored(uint256 indexed claimID, string uri, uint256 totalUnits)"
            }
            EventKind::TransferSingle => {
                "event TransferSingle(address indexed operator, address indexed from, \
                 address indexed to, uint256 id, uint256 value)"
            }
            EventKind::TransferBatch => {
                "event TransferBatch(address indexed operator, address indexed from, \
                 address indexed to, uint256[] ids, uint256[] values)"
            }
            EventKind::ValueTransfer => {
                "event ValueTransfer(uint256 claimID, uint256 fromTokenID, \
                 uint256 toTokenID, uint256 value)"
            }
            EventKind::BatchValueTransfer => {
                "event BatchValueTransfer(uint256[] claimIDs, uint256[] fromTokenIDs, \
                 uint256[] toTokenIDs, uint256[] values)"
            }
            EventKind::AllowlistCreated => {
                "event AllowlistCreated(uint256 tokenID, bytes32 root)"
            }
            EventKind::LeafClaimed => "event LeafClaimed(uint256 tokenID, bytes32 leaf)",
            EventKind::Attested => {
                "event Attested(address indexed recipient, address indexed attester, \
                 bytes32 uid, bytes32 indexed schema)"
            }
            EventKind::TakerBid => {
                "event TakerBid((bytes32,uint256,bool) nonceInvalidationParameters, \
                 address bidUser, address bidRecipient, uint256 strategyId, \
                 address currency, address collection, uint256[] itemIds, \
                 uint256[] amounts, address[2] feeRecipients, uint256[3] feeAmounts)"
            }
        }
    }

    /// The compiled log filter for this event kind.
    pub fn filter(&self) -> Result<EventFilter, IndexerError> {
        EventFilter::parse(self.signature())
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to compile event filter")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::IndexerError;

    use super::EventKind;

    #[test]
    fn test_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let err = EventKind::from_name("SomethingElse").unwrap_err();
        assert_matches!(err.current_context(), IndexerError::Configuration);
    }

    #[test]
    fn test_every_signature_compiles() {
        for kind in EventKind::ALL {
            assert_eq!(kind.filter().unwrap().name(), kind.name());
        }
    }
}
