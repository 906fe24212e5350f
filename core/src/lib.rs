pub mod entity;
pub mod fact;
pub mod token;
pub mod units;
pub mod validation;

pub use entity::{
    AllowListData, AllowListRecord, Attestation, BlockStamp, BlockWindow, Claim, Contract,
    ContractEvent, Fraction, MarketplaceOrder, Sale, SupportedSchema,
};
pub use fact::{Fact, LogPosition, StampedFact};
