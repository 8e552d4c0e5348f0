use alloy_primitives::{keccak256, Address, Bloom, Bytes, FixedBytes, B256, B64, U256};
use alloy_rlp::{BufMut, Encodable, Header};
use serde::{Deserialize, Serialize};

use crate::EncodingError;

/// Block header as reported by `eth_getBlockByNumber`.
///
/// Hash-like fields are kept as raw bytes so their width is checked when the header is converted
/// into a [BlockHeader], instead of being rejected by the JSON decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockHeader {
    pub hash: Bytes,
    pub parent_hash: Bytes,
    pub sha3_uncles: Bytes,
    pub miner: Bytes,
    pub state_root: Bytes,
    pub transactions_root: Bytes,
    pub receipts_root: Bytes,
    pub logs_bloom: Bytes,
    pub difficulty: U256,
    pub number: U256,
    pub gas_limit: U256,
    pub gas_used: U256,
    pub timestamp: U256,
    pub extra_data: Bytes,
    pub mix_hash: Bytes,
    pub nonce: Bytes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_blob_gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_hash: Option<Bytes>,
}

impl RpcBlockHeader {
    /// The header hash claimed by the node.
    pub fn reported_hash(&self) -> Result<B256, EncodingError> {
        fixed("hash", &self.hash)
    }
}

/// Canonical block header, in hash-preimage field order.
///
/// The first 16 fields are always encoded. The optional fields are appended by later forks and
/// are encoded only when present; a present field implies all earlier optional fields are set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncles_hash: B256,
    pub miner: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: B64,
    pub base_fee_per_gas: u64,
    pub withdrawals_root: Option<B256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<B256>,
    pub requests_hash: Option<B256>,
}

impl BlockHeader {
    /// Keccak256 of the canonical encoding; equals the chain's block hash.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    fn payload_length(&self) -> usize {
        let mut length = self.parent_hash.length()
            + self.uncles_hash.length()
            + self.miner.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.logs_bloom.length()
            + self.difficulty.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.gas_used.length()
            + self.timestamp.length()
            + self.extra_data.length()
            + self.mix_hash.length()
            + self.nonce.length()
            + self.base_fee_per_gas.length();

        length += self.withdrawals_root.as_ref().map_or(0, Encodable::length);
        length += self.blob_gas_used.as_ref().map_or(0, Encodable::length);
        length += self.excess_blob_gas.as_ref().map_or(0, Encodable::length);
        length += self
            .parent_beacon_block_root
            .as_ref()
            .map_or(0, Encodable::length);
        length += self.requests_hash.as_ref().map_or(0, Encodable::length);

        length
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);

        self.parent_hash.encode(out);
        self.uncles_hash.encode(out);
        self.miner.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        self.base_fee_per_gas.encode(out);

        if let Some(root) = &self.withdrawals_root {
            root.encode(out);
        }
        if let Some(gas) = &self.blob_gas_used {
            gas.encode(out);
        }
        if let Some(gas) = &self.excess_blob_gas {
            gas.encode(out);
        }
        if let Some(root) = &self.parent_beacon_block_root {
            root.encode(out);
        }
        if let Some(hash) = &self.requests_hash {
            hash.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();

        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

/// Encodes the header into its hash preimage.
pub fn encode_header(header: &BlockHeader) -> Bytes {
    alloy_rlp::encode(header).into()
}

impl TryFrom<&RpcBlockHeader> for BlockHeader {
    type Error = EncodingError;

    fn try_from(rpc: &RpcBlockHeader) -> Result<Self, Self::Error> {
        let base_fee_per_gas = rpc
            .base_fee_per_gas
            .ok_or(EncodingError::MissingField("baseFeePerGas"))?;

        let present = [
            ("withdrawalsRoot", rpc.withdrawals_root.is_some()),
            ("blobGasUsed", rpc.blob_gas_used.is_some()),
            ("excessBlobGas", rpc.excess_blob_gas.is_some()),
            ("parentBeaconBlockRoot", rpc.parent_beacon_block_root.is_some()),
            ("requestsHash", rpc.requests_hash.is_some()),
        ];

        if let Some(w) = present.windows(2).find(|w| w[1].1 && !w[0].1) {
            return Err(EncodingError::TrailingFieldGap(w[1].0));
        }

        Ok(Self {
            parent_hash: fixed("parentHash", &rpc.parent_hash)?,
            uncles_hash: fixed("sha3Uncles", &rpc.sha3_uncles)?,
            miner: fixed::<20>("miner", &rpc.miner)?.into(),
            state_root: fixed("stateRoot", &rpc.state_root)?,
            transactions_root: fixed("transactionsRoot", &rpc.transactions_root)?,
            receipts_root: fixed("receiptsRoot", &rpc.receipts_root)?,
            logs_bloom: fixed::<256>("logsBloom", &rpc.logs_bloom)?.into(),
            difficulty: rpc.difficulty,
            number: quantity("number", rpc.number)?,
            gas_limit: quantity("gasLimit", rpc.gas_limit)?,
            gas_used: quantity("gasUsed", rpc.gas_used)?,
            timestamp: quantity("timestamp", rpc.timestamp)?,
            extra_data: rpc.extra_data.clone(),
            mix_hash: fixed("mixHash", &rpc.mix_hash)?,
            nonce: fixed("nonce", &rpc.nonce)?,
            base_fee_per_gas: quantity("baseFeePerGas", base_fee_per_gas)?,
            withdrawals_root: rpc
                .withdrawals_root
                .as_ref()
                .map(|r| fixed("withdrawalsRoot", r))
                .transpose()?,
            blob_gas_used: rpc
                .blob_gas_used
                .map(|g| quantity("blobGasUsed", g))
                .transpose()?,
            excess_blob_gas: rpc
                .excess_blob_gas
                .map(|g| quantity("excessBlobGas", g))
                .transpose()?,
            parent_beacon_block_root: rpc
                .parent_beacon_block_root
                .as_ref()
                .map(|r| fixed("parentBeaconBlockRoot", r))
                .transpose()?,
            requests_hash: rpc
                .requests_hash
                .as_ref()
                .map(|h| fixed("requestsHash", h))
                .transpose()?,
        })
    }
}

impl From<&BlockHeader> for RpcBlockHeader {
    fn from(header: &BlockHeader) -> Self {
        let bytes = |b: &[u8]| Bytes::copy_from_slice(b);

        Self {
            hash: bytes(header.hash().as_slice()),
            parent_hash: bytes(header.parent_hash.as_slice()),
            sha3_uncles: bytes(header.uncles_hash.as_slice()),
            miner: bytes(header.miner.as_slice()),
            state_root: bytes(header.state_root.as_slice()),
            transactions_root: bytes(header.transactions_root.as_slice()),
            receipts_root: bytes(header.receipts_root.as_slice()),
            logs_bloom: bytes(header.logs_bloom.as_slice()),
            difficulty: header.difficulty,
            number: U256::from(header.number),
            gas_limit: U256::from(header.gas_limit),
            gas_used: U256::from(header.gas_used),
            timestamp: U256::from(header.timestamp),
            extra_data: header.extra_data.clone(),
            mix_hash: bytes(header.mix_hash.as_slice()),
            nonce: bytes(header.nonce.as_slice()),
            base_fee_per_gas: Some(U256::from(header.base_fee_per_gas)),
            withdrawals_root: header.withdrawals_root.map(|r| bytes(r.as_slice())),
            blob_gas_used: header.blob_gas_used.map(U256::from),
            excess_blob_gas: header.excess_blob_gas.map(U256::from),
            parent_beacon_block_root: header.parent_beacon_block_root.map(|r| bytes(r.as_slice())),
            requests_hash: header.requests_hash.map(|h| bytes(h.as_slice())),
        }
    }
}

fn fixed<const N: usize>(field: &'static str, value: &Bytes) -> Result<FixedBytes<N>, EncodingError> {
    FixedBytes::<N>::try_from(&value[..]).map_err(|_| EncodingError::FieldWidth {
        field,
        expected: N,
        got: value.len(),
    })
}

fn quantity(field: &'static str, value: U256) -> Result<u64, EncodingError> {
    u64::try_from(value).map_err(|_| EncodingError::FieldWidth {
        field,
        expected: 8,
        got: value.byte_len(),
    })
}
