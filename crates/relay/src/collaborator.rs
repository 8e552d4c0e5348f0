//! Chain-facing collaborators of the relay, and their JSON-RPC implementation.

use std::future::Future;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use alloy_sol_types::SolCall;
use anyhow::Context as _;
use safe_controller_proofs::RpcBlockHeader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    adjust_eth_sign_signature, safe_execution_succeeded, CallRequest, ChainContext,
    IControllerModule, IPeripheral, ISafe, ProofStruct, RpcReceipt, SafeTransaction,
    SafeTxParams,
};

/// Read access to the source chain state.
pub trait ChainReader: Send + Sync {
    fn block_header(
        &self,
        ctx: &ChainContext,
        number: u64,
    ) -> impl Future<Output = anyhow::Result<RpcBlockHeader>> + Send;

    fn account_proof(
        &self,
        ctx: &ChainContext,
        account: Address,
        slots: &[B256],
        number: u64,
    ) -> impl Future<Output = anyhow::Result<EIP1186AccountProofResponse>> + Send;

    /// Current nonce of the source chain peripheral.
    fn peripheral_nonce(
        &self,
        ctx: &ChainContext,
        peripheral: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
}

/// Signing and execution of Safe transactions through the context account.
pub trait MultisigClient: Send + Sync {
    fn nonce(
        &self,
        ctx: &ChainContext,
        safe: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;

    fn transaction_hash(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;

    /// Signs a Safe transaction hash, returning a signature in the Safe format.
    fn sign(
        &self,
        ctx: &ChainContext,
        hash: B256,
    ) -> impl Future<Output = anyhow::Result<Bytes>> + Send;

    /// Broadcasts `execTransaction` of `safe`, returning the transaction hash.
    fn execute(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
        signatures: Bytes,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;

    /// Waits for `tx_hash`; `success` also requires `safe` to report a successful execution.
    fn wait_for_receipt(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx_hash: B256,
    ) -> impl Future<Output = anyhow::Result<ExecutionReceipt>> + Send;
}

/// A transaction the node refused to send because its estimation reverted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node refused the transaction: {0}")]
pub struct Reverted(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAddresses {
    pub peripheral: Address,
    pub source_safe: Address,
    pub main_safe: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted { tx_hash: B256 },
    Rejected { reason: String },
}

impl Submission {
    /// Outcome of a mined submission.
    pub fn from_receipt(receipt: &RpcReceipt) -> Self {
        let tx_hash = receipt.transaction_hash;

        if receipt.succeeded() {
            Self::Accepted { tx_hash }
        } else {
            Self::Rejected {
                reason: format!("{tx_hash} reverted on chain"),
            }
        }
    }
}

/// The destination controller module, verifying proofs before executing on the main Safe.
pub trait ControllerModule: Send + Sync {
    fn addresses(
        &self,
        ctx: &ChainContext,
        module: Address,
    ) -> impl Future<Output = anyhow::Result<ModuleAddresses>> + Send;

    fn submit(
        &self,
        ctx: &ChainContext,
        module: Address,
        params: SafeTxParams,
        proof: ProofStruct,
        gas: u64,
    ) -> impl Future<Output = anyhow::Result<Submission>> + Send;
}

/// Collaborators backed by the JSON-RPC endpoint of each context.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpc;

impl JsonRpc {
    async fn call<C>(ctx: &ChainContext, to: Address, call: C) -> anyhow::Result<C::Return>
    where
        C: SolCall + Send,
    {
        let request = CallRequest::new(ctx.account, to, call.abi_encode());
        let output = ctx
            .client
            .call(&request)
            .await
            .with_context(|| format!("`{}` failed on `{}`", C::SIGNATURE, ctx.name))?;

        C::abi_decode_returns(&output, true)
            .with_context(|| format!("invalid `{}` output on `{}`", C::SIGNATURE, ctx.name))
    }

    async fn send(ctx: &ChainContext, request: CallRequest) -> anyhow::Result<B256> {
        let request = request.with_gas_price(ctx.gas_price);
        let tx_hash = match ctx.client.send_transaction(&request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                if let Some(message) = e.node_message().filter(|m| m.contains("revert")) {
                    return Err(Reverted(message.to_string()).into());
                }

                return Err(anyhow::Error::new(e)
                    .context(format!("failed to send a transaction on `{}`", ctx.name)));
            }
        };

        tracing::debug!("sent {tx_hash} on `{}`...", ctx.name);

        Ok(tx_hash)
    }

    /// Polls until `tx_hash` is mined, within the receipt timeout of `ctx`.
    async fn receipt(ctx: &ChainContext, tx_hash: B256) -> anyhow::Result<RpcReceipt> {
        let poll = async {
            loop {
                match ctx.client.transaction_receipt(tx_hash).await? {
                    Some(r) if r.block_number.is_some() && r.status.is_some() => {
                        return anyhow::Ok(r);
                    }
                    _ => {
                        tracing::debug!("waiting for {tx_hash} on `{}`...", ctx.name);
                        tokio::time::sleep(ctx.receipt_poll_interval).await;
                    }
                }
            }
        };

        tokio::time::timeout(ctx.receipt_timeout, poll)
            .await
            .with_context(|| format!("timed out waiting for {tx_hash} on `{}`", ctx.name))?
    }
}

impl ChainReader for JsonRpc {
    async fn block_header(
        &self,
        ctx: &ChainContext,
        number: u64,
    ) -> anyhow::Result<RpcBlockHeader> {
        ctx.client
            .block_header(number)
            .await
            .with_context(|| format!("failed to fetch block {number} of `{}`", ctx.name))
    }

    async fn account_proof(
        &self,
        ctx: &ChainContext,
        account: Address,
        slots: &[B256],
        number: u64,
    ) -> anyhow::Result<EIP1186AccountProofResponse> {
        ctx.client
            .proof(account, slots, number)
            .await
            .with_context(|| format!("failed to fetch the proof of {account} on `{}`", ctx.name))
    }

    async fn peripheral_nonce(
        &self,
        ctx: &ChainContext,
        peripheral: Address,
    ) -> anyhow::Result<U256> {
        Ok(Self::call(ctx, peripheral, IPeripheral::nonceCall {}).await?._0)
    }
}

impl MultisigClient for JsonRpc {
    async fn nonce(&self, ctx: &ChainContext, safe: Address) -> anyhow::Result<U256> {
        Ok(Self::call(ctx, safe, ISafe::nonceCall {}).await?._0)
    }

    async fn transaction_hash(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
    ) -> anyhow::Result<B256> {
        let local = tx.hash(ctx.chain_id, safe);
        let remote = Self::call(ctx, safe, tx.hash_call()).await?._0;

        anyhow::ensure!(
            local == remote,
            "safe {safe} on `{}` hashes the transaction to {remote}, expected {local}",
            ctx.name
        );

        Ok(local)
    }

    async fn sign(&self, ctx: &ChainContext, hash: B256) -> anyhow::Result<Bytes> {
        let signature = ctx
            .client
            .sign(ctx.account, hash)
            .await
            .with_context(|| format!("{} failed to sign on `{}`", ctx.account, ctx.name))?;

        Ok(adjust_eth_sign_signature(&signature)?)
    }

    async fn execute(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
        signatures: Bytes,
    ) -> anyhow::Result<B256> {
        let request = CallRequest::new(ctx.account, safe, tx.exec_calldata(signatures));

        Self::send(ctx, request).await
    }

    async fn wait_for_receipt(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx_hash: B256,
    ) -> anyhow::Result<ExecutionReceipt> {
        let receipt = Self::receipt(ctx, tx_hash).await?;

        Ok(ExecutionReceipt {
            tx_hash,
            block_number: receipt.block_number.map_or(0, |b| b.to::<u64>()),
            success: safe_execution_succeeded(&receipt, safe),
        })
    }
}

impl ControllerModule for JsonRpc {
    async fn addresses(
        &self,
        ctx: &ChainContext,
        module: Address,
    ) -> anyhow::Result<ModuleAddresses> {
        let (peripheral, source_safe, main_safe) = tokio::try_join!(
            Self::call(ctx, module, IControllerModule::PERIPHERALCall {}),
            Self::call(ctx, module, IControllerModule::SOURCE_SAFECall {}),
            Self::call(ctx, module, IControllerModule::MAIN_SAFECall {}),
        )?;

        Ok(ModuleAddresses {
            peripheral: peripheral._0,
            source_safe: source_safe._0,
            main_safe: main_safe._0,
        })
    }

    async fn submit(
        &self,
        ctx: &ChainContext,
        module: Address,
        params: SafeTxParams,
        proof: ProofStruct,
        gas: u64,
    ) -> anyhow::Result<Submission> {
        let data = IControllerModule::execTransactionCall { params, proof }.abi_encode();
        let request = CallRequest::new(ctx.account, module, data).with_gas(gas);

        // a verifier rejection surfaces as a reverted simulation
        if let Err(e) = ctx.client.call(&request).await {
            let reason = e.node_message().map(str::to_string);

            return match reason {
                Some(reason) => Ok(Submission::Rejected { reason }),
                None => Err(anyhow::Error::new(e).context(format!(
                    "failed to simulate the submission on `{}`",
                    ctx.name
                ))),
            };
        }

        let tx_hash = match Self::send(ctx, request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => match e.downcast::<Reverted>() {
                Ok(Reverted(reason)) => return Ok(Submission::Rejected { reason }),
                Err(e) => return Err(e),
            },
        };

        let receipt = Self::receipt(ctx, tx_hash).await?;

        Ok(Submission::from_receipt(&receipt))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U64;

    use super::*;

    fn mined(status: u64) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: B256::repeat_byte(0xd5),
            block_number: Some(U64::from(30)),
            status: Some(U64::from(status)),
            logs: vec![],
        }
    }

    #[test]
    fn mined_submission_outcome() {
        assert_eq!(
            Submission::from_receipt(&mined(1)),
            Submission::Accepted {
                tx_hash: B256::repeat_byte(0xd5)
            }
        );

        let Submission::Rejected { reason } = Submission::from_receipt(&mined(0)) else {
            panic!("a reverted submission is rejected");
        };

        assert_eq!(reason, format!("{} reverted on chain", B256::repeat_byte(0xd5)));
    }

    #[test]
    fn refused_sends_are_typed() {
        let e = anyhow::Error::new(Reverted("execution reverted: GS013".into()));

        assert_eq!(
            e.downcast_ref::<Reverted>(),
            Some(&Reverted("execution reverted: GS013".into()))
        );
        assert_eq!(
            e.to_string(),
            "node refused the transaction: execution reverted: GS013"
        );
    }
}
