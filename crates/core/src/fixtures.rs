//! In-memory tries and `eth_getProof` responses for tests.

use alloc::{vec, vec::Vec};
use alloy_primitives::{Bytes, B256};
use alloy_trie::{proof::ProofRetainer, HashBuilder, Nibbles};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieProof {
    pub root: B256,
    pub proof: Vec<Bytes>,
}

/// Builds a trie out of `(path, value)` leaves and retains the proof of `target`.
pub fn trie_proof<I>(leaves: I, target: B256) -> TrieProof
where
    I: IntoIterator<Item = (B256, Vec<u8>)>,
{
    let mut leaves: Vec<_> = leaves
        .into_iter()
        .map(|(path, value)| (Nibbles::unpack(path), value))
        .collect();

    leaves.sort_by(|a, b| a.0.cmp(&b.0));
    leaves.dedup_by(|a, b| a.0 == b.0);

    let target = Nibbles::unpack(target);
    let retainer = ProofRetainer::new(vec![target.clone()]);
    let mut builder = HashBuilder::default().with_proof_retainer(retainer);

    for (path, value) in &leaves {
        builder.add_leaf(path.clone(), value);
    }

    let root = builder.root();
    let proof = builder
        .take_proof_nodes()
        .into_nodes_sorted()
        .into_iter()
        .map(|(_, node)| node)
        .collect();

    TrieProof { root, proof }
}

#[cfg(feature = "bundle")]
pub use state::StateFixture;

#[cfg(feature = "bundle")]
mod state {
    use alloc::{vec, vec::Vec};
    use alloy_primitives::{keccak256, Address, Bytes, B256, B64, U256};
    use alloy_rpc_types_eth::{EIP1186AccountProofResponse, EIP1186StorageProof};
    use alloy_serde::JsonStorageKey;

    use super::trie_proof;
    use crate::{
        key::{account_path, storage_path},
        AccountRecord, BlockHeader, RpcBlockHeader,
    };

    /// A source chain block whose state holds `value` at `slot` of `account`.
    #[derive(Debug, Clone)]
    pub struct StateFixture {
        pub account: Address,
        pub slot: B256,
        pub value: U256,
        pub record: AccountRecord,
        pub block: BlockHeader,
        pub header: RpcBlockHeader,
        pub proof: EIP1186AccountProofResponse,
    }

    impl StateFixture {
        pub fn new(account: Address, slot: B256, value: U256, block_number: u64) -> Self {
            let mut storage: Vec<_> = (1u8..=8)
                .map(|i| {
                    let value = U256::from(i) << 160;
                    (storage_path(B256::with_last_byte(i)), alloy_rlp::encode(value))
                })
                .collect();
            storage.push((storage_path(slot), alloy_rlp::encode(value)));

            let storage = trie_proof(storage, storage_path(slot));

            let record = AccountRecord {
                nonce: 1,
                balance: U256::ZERO,
                storage_root: storage.root,
                code_hash: keccak256(b"peripheral"),
            };

            let mut accounts: Vec<_> = (1u8..=16)
                .map(|i| {
                    let other = AccountRecord {
                        nonce: i as u64,
                        balance: U256::from(i) * U256::from(10).pow(U256::from(18)),
                        storage_root: alloy_trie::EMPTY_ROOT_HASH,
                        code_hash: keccak256(b""),
                    };
                    (account_path(Address::with_last_byte(i)), other.to_rlp())
                })
                .collect();
            accounts.push((account_path(account), record.to_rlp()));

            let state = trie_proof(accounts, account_path(account));

            let block = BlockHeader {
                parent_hash: keccak256(block_number.to_be_bytes()),
                uncles_hash: B256::repeat_byte(0x1d),
                miner: Address::repeat_byte(0x95),
                state_root: state.root,
                transactions_root: B256::repeat_byte(0x56),
                receipts_root: B256::repeat_byte(0x57),
                number: block_number,
                gas_limit: 30_000_000,
                gas_used: 21_000,
                timestamp: 1_700_000_000 + block_number * 12,
                extra_data: Bytes::from_static(b"fixture"),
                mix_hash: B256::repeat_byte(0x6d),
                nonce: B64::ZERO,
                base_fee_per_gas: 7,
                ..Default::default()
            };

            let proof = EIP1186AccountProofResponse {
                address: account,
                balance: record.balance,
                code_hash: record.code_hash,
                nonce: record.nonce,
                storage_hash: record.storage_root,
                account_proof: state.proof,
                storage_proof: vec![EIP1186StorageProof {
                    key: JsonStorageKey::Hash(slot),
                    value,
                    proof: storage.proof,
                }],
            };

            Self {
                account,
                slot,
                value,
                record,
                header: RpcBlockHeader::from(&block),
                block,
                proof,
            }
        }
    }
}
