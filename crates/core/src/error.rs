use alloc::string::String;
use alloy_primitives::B256;
use thiserror::Error;

/// Malformed input that cannot be brought into the canonical wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("field `{field}` must be {expected} bytes, got {got}")]
    FieldWidth {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("missing header field `{0}`")]
    MissingField(&'static str),

    #[error("header field `{0}` is set while an earlier fork field is missing")]
    TrailingFieldGap(&'static str),

    #[error("proof node {index} is not canonical RLP: {reason}")]
    MalformedNode { index: usize, reason: String },

    #[error("malformed RLP list: {0}")]
    MalformedList(String),

    #[error("malformed account record: {0}")]
    MalformedAccount(String),
}

/// A Merkle-Patricia proof that does not support the claimed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("proof contains no nodes")]
    EmptyProof,

    #[error("node {index} hash mismatch: expected {expected}, got {got}")]
    HashMismatch {
        index: usize,
        expected: B256,
        got: B256,
    },

    #[error("node {index} is malformed: {reason}")]
    MalformedNode { index: usize, reason: String },

    #[error("node {index} path diverges from the key")]
    PathMismatch { index: usize },

    #[error("key is not present in the trie")]
    KeyNotFound,

    #[error("proof ends before the key is resolved")]
    Incomplete,

    #[error("proof has {count} nodes past the resolved value")]
    UnusedNodes { count: usize },

    #[error("header hash mismatch: node reported {expected}, encoding hashes to {got}")]
    HeaderHashMismatch { expected: B256, got: B256 },

    #[error("no storage proof for slot {0}")]
    StorageProofMissing(B256),

    #[error("{0} value does not match the proven leaf")]
    ValueMismatch(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("verification failed: {0}")]
    VerificationFailed(#[from] ProofError),
}
