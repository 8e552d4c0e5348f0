use alloy_primitives::{Address, B256, U256};
use safe_controller_proofs::{storage_key, EncodingError, Error, ProofBundle, ProofError};
use thiserror::Error;

use crate::{ChainContext, ChainReader};

/// Storage slot to prove, at a source chain block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofRequest {
    pub block_number: u64,
    pub account: Address,
    pub slot: B256,
    pub nonce: U256,
}

impl ProofRequest {
    /// Slot of the `mapping(address => _)` entry `key_address` declared at `slot_index`.
    pub fn for_mapping(
        block_number: u64,
        account: Address,
        key_address: Address,
        slot_index: U256,
        nonce: U256,
    ) -> Self {
        Self {
            block_number,
            account,
            slot: storage_key(key_address, slot_index),
            nonce,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to fetch the proof data: {0:#}")]
    Rpc(anyhow::Error),

    #[error(transparent)]
    Encoding(EncodingError),

    #[error(transparent)]
    VerificationFailed(ProofError),
}

impl From<Error> for BuildError {
    fn from(e: Error) -> Self {
        match e {
            Error::Encoding(e) => Self::Encoding(e),
            Error::VerificationFailed(e) => Self::VerificationFailed(e),
        }
    }
}

/// Fetches the block and proofs of `request` and assembles a locally verified bundle.
pub async fn build_proof_bundle<R>(
    reader: &R,
    ctx: &ChainContext,
    request: &ProofRequest,
) -> Result<ProofBundle, BuildError>
where
    R: ChainReader,
{
    let ProofRequest {
        block_number,
        account,
        slot,
        nonce,
    } = *request;

    tracing::debug!("fetching block {block_number} of `{}`...", ctx.name);

    let header = reader
        .block_header(ctx, block_number)
        .await
        .map_err(BuildError::Rpc)?;

    tracing::debug!("fetching proof of slot {slot} of {account}...");

    let proof = reader
        .account_proof(ctx, account, &[slot], block_number)
        .await
        .map_err(BuildError::Rpc)?;

    let bundle = ProofBundle::assemble(&header, &proof, slot, nonce).inspect_err(|e| {
        tracing::warn!("proof of block {block_number} rejected locally: {e}");
    })?;

    tracing::info!(
        "proof bundle of block {block_number} ({}) verified, {} header bytes, {} account proof bytes, {} storage proof bytes",
        bundle.block_hash,
        bundle.block_header.len(),
        bundle.account_proof.len(),
        bundle.storage_proof.len()
    );

    Ok(bundle)
}
