use alloy_primitives::{keccak256, Address, B256, U256};

/// Storage key of `mapping(address => ...)` entry `address` declared at `slot`.
///
/// `keccak256(pad32(address) ++ be32(slot))`, the Solidity layout for a mapping keyed by an
/// address.
pub fn storage_key(address: Address, slot: U256) -> B256 {
    let key = address.into_word();
    let slot = slot.to_be_bytes::<32>();

    keccak256([key.as_slice(), &slot].concat())
}

/// Path of an account in the state trie.
pub fn account_path(address: Address) -> B256 {
    keccak256(address)
}

/// Path of a storage key in an account storage trie.
pub fn storage_path(key: B256) -> B256 {
    keccak256(key)
}
