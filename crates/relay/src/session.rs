//! Two-phase relay of a destination Safe transaction through a source chain proof.
//!
//! The destination owners sign the relayed transaction first. The source Safe then records it on
//! the peripheral, whose storage at the inclusion block is proven back to the destination
//! controller module, which executes the transaction on the main Safe.

use std::fmt;

use alloy_primitives::{Address, Bytes, B256, U256};
use safe_controller_proofs::{EncodingError, ProofBundle, ProofError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    build_proof_bundle, prevalidated_signature, BuildError, ChainContext, ChainReader,
    ControllerModule, ExecutionReceipt, MultisigClient, Operation, ProofRequest, ProofStruct,
    Reverted, SafeTransaction, Submission,
};

/// Destination Safe transaction to relay, without its nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
}

impl RelayAction {
    pub const GAS_PRICE: u64 = 1_000_000_000;

    /// Transfer of `value` wei of the native token to `to`, refunding `to`.
    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            value,
            gas_price: U256::from(Self::GAS_PRICE),
            refund_receiver: to,
            ..Default::default()
        }
    }

    pub fn with_nonce(&self, nonce: U256) -> SafeTransaction {
        SafeTransaction {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation,
            safe_tx_gas: self.safe_tx_gas,
            base_gas: self.base_gas,
            gas_price: self.gas_price,
            gas_token: self.gas_token,
            refund_receiver: self.refund_receiver,
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPlan {
    pub controller_module: Address,
    pub peripheral: Address,
    pub source_safe: Address,
    pub main_safe: Address,

    /// Key of the peripheral mapping entry proven on the source chain.
    pub slot_key: Address,
    pub slot_index: U256,

    pub source_safe_tx_gas: U256,
    pub destination_gas: u64,
    pub action: RelayAction,
}

impl RelayPlan {
    pub const SOURCE_SAFE_TX_GAS: u64 = 500_000;
    pub const DESTINATION_GAS: u64 = 750_000;

    /// Reads the peripheral and Safe addresses the controller module is bound to.
    pub async fn resolve<M>(
        module: &M,
        destination: &ChainContext,
        controller_module: Address,
        action: RelayAction,
    ) -> anyhow::Result<Self>
    where
        M: ControllerModule,
    {
        let addresses = module.addresses(destination, controller_module).await?;

        tracing::info!(
            "controller module {controller_module} binds peripheral {}, source safe {} and main safe {}",
            addresses.peripheral,
            addresses.source_safe,
            addresses.main_safe
        );

        Ok(Self {
            controller_module,
            peripheral: addresses.peripheral,
            source_safe: addresses.source_safe,
            main_safe: addresses.main_safe,
            slot_key: addresses.source_safe,
            slot_index: U256::ZERO,
            source_safe_tx_gas: U256::from(Self::SOURCE_SAFE_TX_GAS),
            destination_gas: Self::DESTINATION_GAS,
            action,
        })
    }
}

/// Outcome of a completed relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    pub source_tx: B256,
    pub block_number: u64,
    pub destination_tx: B256,
    pub transaction: SafeTransaction,
    pub bundle: ProofBundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AwaitingTargetSignature,
    ExecutingOnSource,
    AwaitingReceipt,
    BuildingProof,
    SubmittingToDestination,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingTargetSignature => "awaiting target signature",
            Self::ExecutingOnSource => "executing on source",
            Self::AwaitingReceipt => "awaiting receipt",
            Self::BuildingProof => "building proof",
            Self::SubmittingToDestination => "submitting to destination",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// The source execution was refused on send, or mined without executing.
    #[error("source transaction reverted: {detail}")]
    ExecutionReverted {
        tx_hash: Option<B256>,
        detail: String,
    },

    #[error("invalid proof: {0}")]
    ProofInvalid(ProofError),

    #[error("encoding failed: {0}")]
    Encoding(EncodingError),

    #[error("destination rejected the proof: {0}")]
    DestinationRejected(String),

    #[error("chain access failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("relay failed while {phase}: {reason}")]
pub struct RelayError {
    pub phase: Phase,
    pub reason: FailureReason,
}

impl RelayError {
    pub fn new(phase: Phase, reason: FailureReason) -> Self {
        Self { phase, reason }
    }

    fn transport(phase: Phase, e: anyhow::Error) -> Self {
        Self::new(phase, FailureReason::Transport(format!("{e:#}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AwaitingTargetSignature,
    ExecutingOnSource {
        transaction: SafeTransaction,
        signature: Bytes,
    },
    AwaitingReceipt {
        transaction: SafeTransaction,
        signature: Bytes,
        peripheral_nonce: U256,
        tx_hash: B256,
    },
    BuildingProof {
        transaction: SafeTransaction,
        signature: Bytes,
        peripheral_nonce: U256,
        receipt: ExecutionReceipt,
    },
    SubmittingToDestination {
        transaction: SafeTransaction,
        signature: Bytes,
        receipt: ExecutionReceipt,
        bundle: ProofBundle,
    },
    Completed(RelayReceipt),
    Failed(RelayError),
}

impl RelayState {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::AwaitingTargetSignature => Some(Phase::AwaitingTargetSignature),
            Self::ExecutingOnSource { .. } => Some(Phase::ExecutingOnSource),
            Self::AwaitingReceipt { .. } => Some(Phase::AwaitingReceipt),
            Self::BuildingProof { .. } => Some(Phase::BuildingProof),
            Self::SubmittingToDestination { .. } => Some(Phase::SubmittingToDestination),
            Self::Idle | Self::Completed(_) | Self::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// A single relay attempt.
///
/// A session never retries: a failed phase moves it to [RelayState::Failed], and a new attempt
/// needs a new session.
pub struct RelaySession<C> {
    source: ChainContext,
    destination: ChainContext,
    plan: RelayPlan,
    collaborator: C,
    state: RelayState,
}

impl<C> RelaySession<C>
where
    C: ChainReader + MultisigClient + ControllerModule,
{
    pub fn new(
        source: ChainContext,
        destination: ChainContext,
        plan: RelayPlan,
        collaborator: C,
    ) -> Self {
        Self {
            source,
            destination,
            plan,
            collaborator,
            state: RelayState::Idle,
        }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    pub fn plan(&self) -> &RelayPlan {
        &self.plan
    }

    /// Performs the pending transition; terminal states are left untouched.
    pub async fn step(&mut self) -> &RelayState {
        if self.state.is_terminal() {
            return &self.state;
        }

        let state = std::mem::replace(&mut self.state, RelayState::Idle);
        let phase = state.phase();

        self.state = match self.advance(state).await {
            Ok(next) => next,
            Err(e) => RelayState::Failed(e),
        };

        match (&self.state, phase) {
            (RelayState::Failed(e), _) => tracing::error!("{e}"),
            (RelayState::Completed(r), _) => tracing::info!(
                "relay completed, source tx {}, destination tx {}",
                r.source_tx,
                r.destination_tx
            ),
            (next, Some(phase)) => {
                tracing::info!("{phase} done, next phase: {:?}", next.phase())
            }
            (next, None) => tracing::info!("relay started, next phase: {:?}", next.phase()),
        }

        &self.state
    }

    /// Drives the session to a terminal state.
    pub async fn run(mut self) -> Result<RelayReceipt, RelayError> {
        loop {
            self.step().await;

            match self.state {
                RelayState::Completed(receipt) => return Ok(receipt),
                RelayState::Failed(error) => return Err(error),
                _ => continue,
            }
        }
    }

    async fn advance(&self, state: RelayState) -> Result<RelayState, RelayError> {
        match state {
            RelayState::Idle => Ok(RelayState::AwaitingTargetSignature),
            RelayState::AwaitingTargetSignature => self.sign_on_destination().await,
            RelayState::ExecutingOnSource {
                transaction,
                signature,
            } => self.execute_on_source(transaction, signature).await,
            RelayState::AwaitingReceipt {
                transaction,
                signature,
                peripheral_nonce,
                tx_hash,
            } => {
                self.await_receipt(transaction, signature, peripheral_nonce, tx_hash)
                    .await
            }
            RelayState::BuildingProof {
                transaction,
                signature,
                peripheral_nonce,
                receipt,
            } => {
                self.build_proof(transaction, signature, peripheral_nonce, receipt)
                    .await
            }
            RelayState::SubmittingToDestination {
                transaction,
                signature,
                receipt,
                bundle,
            } => {
                self.submit_to_destination(transaction, signature, receipt, bundle)
                    .await
            }
            terminal @ (RelayState::Completed(_) | RelayState::Failed(_)) => Ok(terminal),
        }
    }

    async fn sign_on_destination(&self) -> Result<RelayState, RelayError> {
        const PHASE: Phase = Phase::AwaitingTargetSignature;

        let ctx = &self.destination;
        let safe = self.plan.main_safe;

        let nonce = MultisigClient::nonce(&self.collaborator, ctx, safe)
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        let transaction = self.plan.action.with_nonce(nonce);
        let hash = self
            .collaborator
            .transaction_hash(ctx, safe, &transaction)
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        tracing::info!("signing safe transaction {hash} of {safe} on `{}`...", ctx.name);

        let signature = self
            .collaborator
            .sign(ctx, hash)
            .await
            .map_err(|e| RelayError::new(PHASE, FailureReason::SigningFailed(format!("{e:#}"))))?;

        Ok(RelayState::ExecutingOnSource {
            transaction,
            signature,
        })
    }

    async fn execute_on_source(
        &self,
        transaction: SafeTransaction,
        signature: Bytes,
    ) -> Result<RelayState, RelayError> {
        const PHASE: Phase = Phase::ExecutingOnSource;

        let ctx = &self.source;
        let safe = self.plan.source_safe;

        let peripheral_nonce = self
            .collaborator
            .peripheral_nonce(ctx, self.plan.peripheral)
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        let nonce = MultisigClient::nonce(&self.collaborator, ctx, safe)
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        let source = SafeTransaction {
            to: self.plan.peripheral,
            data: transaction.peripheral_calldata(signature.clone()),
            safe_tx_gas: self.plan.source_safe_tx_gas,
            refund_receiver: ctx.account,
            nonce,
            ..Default::default()
        };

        tracing::info!(
            "executing peripheral call of {safe} on `{}` with peripheral nonce {peripheral_nonce}...",
            ctx.name
        );

        let tx_hash = self
            .collaborator
            .execute(ctx, safe, &source, prevalidated_signature(ctx.account))
            .await
            .map_err(|e| match e.downcast_ref::<Reverted>() {
                Some(Reverted(detail)) => RelayError::new(
                    PHASE,
                    FailureReason::ExecutionReverted {
                        tx_hash: None,
                        detail: detail.clone(),
                    },
                ),
                None => RelayError::transport(PHASE, e),
            })?;

        tracing::info!("source chain tx: {tx_hash}");

        Ok(RelayState::AwaitingReceipt {
            transaction,
            signature,
            peripheral_nonce,
            tx_hash,
        })
    }

    async fn await_receipt(
        &self,
        transaction: SafeTransaction,
        signature: Bytes,
        peripheral_nonce: U256,
        tx_hash: B256,
    ) -> Result<RelayState, RelayError> {
        const PHASE: Phase = Phase::AwaitingReceipt;

        let receipt = self
            .collaborator
            .wait_for_receipt(&self.source, self.plan.source_safe, tx_hash)
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        if !receipt.success {
            return Err(RelayError::new(
                PHASE,
                FailureReason::ExecutionReverted {
                    tx_hash: Some(tx_hash),
                    detail: format!("{tx_hash} failed in block {}", receipt.block_number),
                },
            ));
        }

        tracing::info!("{tx_hash} included in block {}", receipt.block_number);

        Ok(RelayState::BuildingProof {
            transaction,
            signature,
            peripheral_nonce,
            receipt,
        })
    }

    async fn build_proof(
        &self,
        transaction: SafeTransaction,
        signature: Bytes,
        peripheral_nonce: U256,
        receipt: ExecutionReceipt,
    ) -> Result<RelayState, RelayError> {
        const PHASE: Phase = Phase::BuildingProof;

        let request = ProofRequest::for_mapping(
            receipt.block_number,
            self.plan.peripheral,
            self.plan.slot_key,
            self.plan.slot_index,
            peripheral_nonce,
        );

        let bundle = build_proof_bundle(&self.collaborator, &self.source, &request)
            .await
            .map_err(|e| {
                let reason = match e {
                    BuildError::Rpc(e) => FailureReason::Transport(format!("{e:#}")),
                    BuildError::Encoding(e) => FailureReason::Encoding(e),
                    BuildError::VerificationFailed(e) => FailureReason::ProofInvalid(e),
                };

                RelayError::new(PHASE, reason)
            })?;

        Ok(RelayState::SubmittingToDestination {
            transaction,
            signature,
            receipt,
            bundle,
        })
    }

    async fn submit_to_destination(
        &self,
        transaction: SafeTransaction,
        signature: Bytes,
        receipt: ExecutionReceipt,
        bundle: ProofBundle,
    ) -> Result<RelayState, RelayError> {
        const PHASE: Phase = Phase::SubmittingToDestination;

        let ctx = &self.destination;
        let params = transaction.params(signature);
        let proof = ProofStruct::from(&bundle);

        let submission = self
            .collaborator
            .submit(
                ctx,
                self.plan.controller_module,
                params,
                proof,
                self.plan.destination_gas,
            )
            .await
            .map_err(|e| RelayError::transport(PHASE, e))?;

        match submission {
            Submission::Accepted { tx_hash } => {
                tracing::info!("destination chain tx: {tx_hash}");

                Ok(RelayState::Completed(RelayReceipt {
                    source_tx: receipt.tx_hash,
                    block_number: receipt.block_number,
                    destination_tx: tx_hash,
                    transaction,
                    bundle,
                }))
            }

            Submission::Rejected { reason } => Err(RelayError::new(
                PHASE,
                FailureReason::DestinationRejected(reason),
            )),
        }
    }
}
