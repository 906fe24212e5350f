//! Token id arithmetic for the 1155-style claim/fraction numbering scheme.
//!
//! A claim's token id occupies the upper 128 bits; the lower 128 bits select
//! a fraction under that claim. A token id with a zero fraction index is the
//! claim's own ("root") id.

use alloy_primitives::{Address, U256};

/// Mask selecting the fraction index bits of a token id.
pub const FRACTION_INDEX_MASK: U256 = U256::from_limbs([u64::MAX, u64::MAX, 0, 0]);

/// Returns the claim (root) token id the given token id belongs to.
pub fn claim_token_id(token_id: U256) -> U256 {
    token_id & !FRACTION_INDEX_MASK
}

/// Returns the fraction index of the given token id.
pub fn fraction_index(token_id: U256) -> U256 {
    token_id & FRACTION_INDEX_MASK
}

/// Returns true if the token id is a claim (root) id rather than a fraction.
pub fn is_claim_token(token_id: U256) -> bool {
    !token_id.is_zero() && fraction_index(token_id).is_zero()
}

/// Derives the chain-qualified hypercert id used across the API surface.
pub fn hypercert_id(chain_id: u64, contract_address: Address, token_id: U256) -> String {
    format!(
        "{}-{}-{}",
        chain_id,
        contract_address.to_checksum(None),
        claim_token_id(token_id)
    )
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};

    use super::{claim_token_id, fraction_index, hypercert_id, is_claim_token};

    fn root(index: u64) -> U256 {
        U256::from(index) << 128
    }

    #[test]
    fn test_root_id_is_claim_token() {
        assert!(is_claim_token(root(1)));
        assert!(is_claim_token(root(42)));
        assert!(!is_claim_token(U256::ZERO));
    }

    #[test]
    fn test_fraction_id_is_not_claim_token() {
        let fraction = root(1) + U256::from(7);
        assert!(!is_claim_token(fraction));
        assert_eq!(fraction_index(fraction), U256::from(7));
    }

    #[test]
    fn test_claim_token_id_strips_fraction_index() {
        let fraction = root(3) + U256::from(1234);
        assert_eq!(claim_token_id(fraction), root(3));
        assert_eq!(claim_token_id(root(3)), root(3));
    }

    #[test]
    fn test_hypercert_id_uses_root() {
        let contract = address!("822F17A9A5EeCFd66dBAFf7946a8071C265D1d07");
        let fraction = root(2) + U256::from(5);
        let id = hypercert_id(10, contract, fraction);
        assert_eq!(
            id,
            format!("10-{}-{}", contract.to_checksum(None), root(2))
        );
    }
}
