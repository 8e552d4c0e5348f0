use alloc::{string::ToString as _, vec::Vec};
use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable as _, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::EncodingError;

/// Account leaf of the state trie.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl AccountRecord {
    pub fn to_rlp(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    pub fn from_rlp(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut buf = bytes;
        let account =
            Self::decode(&mut buf).map_err(|e| EncodingError::MalformedAccount(e.to_string()))?;

        if !buf.is_empty() {
            return Err(EncodingError::MalformedAccount(
                "trailing bytes after account".to_string(),
            ));
        }

        Ok(account)
    }
}
