//! Wire encodings of Merkle-Patricia proof node lists.
//!
//! Nodes reach the verifying contract in two shapes: as a flat list of raw node strings
//! ([encode_list]) or as a list of the decoded node structures ([reencode_decoded_nodes]). The
//! latter embeds each node as a nested list instead of an opaque byte string.

use alloc::{
    string::{String, ToString as _},
    vec::Vec,
};
use alloy_primitives::Bytes;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::EncodingError;

/// A decoded RLP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    /// Strictly decodes a single item; the input must be its canonical encoding, with no
    /// trailing bytes.
    pub fn decode_canonical(raw: &[u8]) -> Result<Self, String> {
        let item: Self = rlp::decode(raw).map_err(|e| e.to_string())?;

        if item.to_vec() != raw {
            return Err("non-canonical encoding or trailing bytes".to_string());
        }

        Ok(item)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn as_list(&self) -> Option<&[RlpItem]> {
        match self {
            Self::List(items) => Some(items),
            Self::Bytes(_) => None,
        }
    }
}

impl Decodable for RlpItem {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.is_list() {
            rlp.as_list().map(Self::List)
        } else {
            rlp.data().map(|d| Self::Bytes(d.to_vec()))
        }
    }
}

impl Encodable for RlpItem {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            Self::Bytes(b) => {
                s.encoder().encode_value(b);
            }
            Self::List(items) => {
                s.append_list::<RlpItem, RlpItem>(items);
            }
        }
    }
}

/// Wraps raw node strings into a list of byte strings.
pub fn encode_list(nodes: &[Bytes]) -> Bytes {
    let items: Vec<_> = nodes.iter().map(|n| RlpItem::Bytes(n.to_vec())).collect();

    RlpItem::List(items).to_vec().into()
}

/// Inverse of [encode_list].
pub fn decode_list(raw: &[u8]) -> Result<Vec<Bytes>, EncodingError> {
    let item = RlpItem::decode_canonical(raw).map_err(EncodingError::MalformedList)?;
    let items = item
        .as_list()
        .ok_or_else(|| EncodingError::MalformedList("expected a list".to_string()))?;

    items
        .iter()
        .map(|i| match i {
            RlpItem::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
            RlpItem::List(_) => Err(EncodingError::MalformedList(
                "expected byte string items".to_string(),
            )),
        })
        .collect()
}

/// Decodes every raw node and encodes the list of the decoded structures.
pub fn reencode_decoded_nodes(nodes: &[Bytes]) -> Result<Bytes, EncodingError> {
    let items = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            RlpItem::decode_canonical(node)
                .map_err(|reason| EncodingError::MalformedNode { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RlpItem::List(items).to_vec().into())
}

/// Splits a structured node list back into the raw node encodings.
pub fn decode_structured(raw: &[u8]) -> Result<Vec<Bytes>, EncodingError> {
    let item = RlpItem::decode_canonical(raw).map_err(EncodingError::MalformedList)?;

    item.as_list()
        .ok_or_else(|| EncodingError::MalformedList("expected a list".to_string()))
        .map(|nodes| nodes.iter().map(|n| n.to_vec().into()).collect())
}
