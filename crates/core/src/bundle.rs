use alloy_primitives::{keccak256, Bytes, B256, U256};
use alloy_rlp::Decodable as _;
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use alloy_serde::JsonStorageKey;
use serde::{Deserialize, Serialize};

use crate::{
    key::{account_path, storage_path},
    nodes, trie, AccountRecord, BlockHeader, Error, ProofError, RpcBlockHeader,
};

/// Proof that a storage slot held a value at a source chain block, in the shape consumed by the
/// destination verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub block_number: u64,
    pub block_hash: B256,

    /// Peripheral nonce claimed for the relayed transaction.
    pub nonce: U256,

    /// RLP encoded block header.
    pub block_header: Bytes,

    /// Account proof nodes, re-encoded as a list of decoded nodes.
    pub account_proof: Bytes,

    /// Storage proof nodes, re-encoded as a list of decoded nodes.
    pub storage_proof: Bytes,
}

impl From<&EIP1186AccountProofResponse> for AccountRecord {
    fn from(proof: &EIP1186AccountProofResponse) -> Self {
        Self {
            nonce: proof.nonce,
            balance: proof.balance,
            storage_root: proof.storage_hash,
            code_hash: proof.code_hash,
        }
    }
}

/// Storage key of an `eth_getProof` entry.
pub fn json_storage_key(key: &JsonStorageKey) -> B256 {
    match key {
        JsonStorageKey::Hash(b) => *b,
        JsonStorageKey::Number(n) => B256::from(n.to_be_bytes::<32>()),
    }
}

impl ProofBundle {
    /// Verifies the fetched header and proofs and assembles the bundle for `slot`.
    ///
    /// Mirrors the checks of the destination verifier: the header must hash to the reported
    /// block hash, the account proof must resolve to the reported account under the header state
    /// root, and the storage proof must resolve to the reported slot value under the account
    /// storage root.
    pub fn assemble(
        header: &RpcBlockHeader,
        proof: &EIP1186AccountProofResponse,
        slot: B256,
        nonce: U256,
    ) -> Result<Self, Error> {
        let reported = header.reported_hash()?;
        let header = BlockHeader::try_from(header)?;
        let block_header = crate::encode_header(&header);
        let block_hash = keccak256(&block_header);

        if block_hash != reported {
            return Err(ProofError::HeaderHashMismatch {
                expected: reported,
                got: block_hash,
            }
            .into());
        }

        let account = AccountRecord::from(proof);
        let leaf = trie::verify_proof(
            header.state_root,
            account_path(proof.address),
            &proof.account_proof,
        )?;

        if leaf[..] != account.to_rlp()[..] {
            return Err(ProofError::ValueMismatch("account").into());
        }

        let storage = proof
            .storage_proof
            .iter()
            .find(|p| json_storage_key(&p.key) == slot)
            .ok_or(ProofError::StorageProofMissing(slot))?;

        let leaf = trie::verify_proof(account.storage_root, storage_path(slot), &storage.proof)?;
        let mut buf = &leaf[..];
        let value = U256::decode(&mut buf).map_err(|_| ProofError::ValueMismatch("storage"))?;

        if !buf.is_empty() || value != storage.value {
            return Err(ProofError::ValueMismatch("storage").into());
        }

        Ok(Self {
            block_number: header.number,
            block_hash,
            nonce,
            block_header,
            account_proof: nodes::reencode_decoded_nodes(&proof.account_proof)?,
            storage_proof: nodes::reencode_decoded_nodes(&storage.proof)?,
        })
    }
}
