#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256, U64};
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use safe_controller_proofs::{
    fixtures::StateFixture, key::storage_path, nodes, storage_key, trie, RpcBlockHeader,
};
use alloy_sol_types::SolEvent as _;
use safe_controller_relay::{
    adjust_eth_sign_signature, safe_execution_succeeded, ChainContext, ChainReader,
    ControllerModule, ExecutionReceipt, ISafe, ModuleAddresses, MultisigClient, ProofStruct,
    RelayAction, RelayPlan, Reverted, RpcClient, RpcLog, RpcReceipt, SafeTransaction,
    SafeTxParams, Submission,
};

pub const CONTROLLER_MODULE: Address = address!("c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0");
pub const PERIPHERAL: Address = address!("9e419e419e419e419e419e419e419e419e419e41");
pub const SOURCE_SAFE: Address = address!("5afe00000000000000000000000000000000000a");
pub const MAIN_SAFE: Address = address!("5afe00000000000000000000000000000000000b");
pub const SOURCE_OWNER: Address = address!("0000000000000000000000000000000000000a11");
pub const DESTINATION_OWNER: Address = address!("0000000000000000000000000000000000000b11");

pub const SOURCE_BLOCK: u64 = 9_000_000;
pub const PERIPHERAL_NONCE: u64 = 3;

pub fn source() -> ChainContext {
    ChainContext::new(
        "source",
        10200,
        SOURCE_OWNER,
        RpcClient::new("http://source.invalid"),
    )
}

pub fn destination() -> ChainContext {
    ChainContext::new(
        "destination",
        100,
        DESTINATION_OWNER,
        RpcClient::new("http://destination.invalid"),
    )
}

pub fn plan() -> RelayPlan {
    RelayPlan {
        controller_module: CONTROLLER_MODULE,
        peripheral: PERIPHERAL,
        source_safe: SOURCE_SAFE,
        main_safe: MAIN_SAFE,
        slot_key: SOURCE_SAFE,
        slot_index: U256::ZERO,
        source_safe_tx_gas: U256::from(RelayPlan::SOURCE_SAFE_TX_GAS),
        destination_gas: RelayPlan::DESTINATION_GAS,
        action: RelayAction::native_transfer(DESTINATION_OWNER, U256::from(1)),
    }
}

/// Source chain block recorded after the peripheral stored the relayed nonce.
pub fn source_block() -> StateFixture {
    StateFixture::new(
        PERIPHERAL,
        storage_key(SOURCE_SAFE, U256::ZERO),
        U256::from(PERIPHERAL_NONCE + 1),
        SOURCE_BLOCK,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub chain: String,
    pub method: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub safe: Address,
    pub tx: SafeTransaction,
    pub signatures: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    pub params: SafeTxParams,
    pub proof: ProofStruct,
    pub gas: u64,
}

#[derive(Debug)]
pub struct Chains {
    pub block: StateFixture,
    pub calls: Vec<Call>,
    pub executions: Vec<Execution>,
    pub relayed: Vec<Relayed>,
    pub main_safe_nonce: U256,
    pub source_safe_nonce: U256,

    /// Peripheral nonces already consumed by the destination verifier.
    pub consumed: BTreeSet<U256>,

    pub reject_signing: bool,

    /// The node refuses to send the source execution.
    pub reject_source_send: bool,

    /// The source execution is mined with a failed status.
    pub revert_source: bool,

    /// The source execution is mined but its inner call fails.
    pub fail_source_call: bool,

    pub tamper_account_proof: bool,

    /// The destination submission passes simulation and reverts once mined.
    pub revert_destination: bool,
}

/// In-memory source and destination chains.
///
/// Clones share the same chains, so a recorded relay can be replayed by another session.
#[derive(Debug, Clone)]
pub struct MockChains {
    pub inner: Arc<Mutex<Chains>>,
}

impl Default for MockChains {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Chains {
                block: source_block(),
                calls: Vec::new(),
                executions: Vec::new(),
                relayed: Vec::new(),
                main_safe_nonce: U256::from(7),
                source_safe_nonce: U256::from(12),
                consumed: BTreeSet::new(),
                reject_signing: false,
                reject_source_send: false,
                revert_source: false,
                fail_source_call: false,
                tamper_account_proof: false,
                revert_destination: false,
            })),
        }
    }
}

impl MockChains {
    pub fn with(self, f: impl FnOnce(&mut Chains)) -> Self {
        f(&mut *self.inner.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn methods(&self) -> Vec<(String, &'static str)> {
        self.calls()
            .into_iter()
            .map(|c| (c.chain, c.method))
            .collect()
    }

    pub fn called(&self, method: &str) -> bool {
        self.calls().iter().any(|c| c.method == method)
    }

    fn record(&self, ctx: &ChainContext, method: &'static str) -> MutexGuard<'_, Chains> {
        let mut chains = self.inner.lock().unwrap();

        chains.calls.push(Call {
            chain: ctx.name.clone(),
            method,
        });

        chains
    }
}

impl ChainReader for MockChains {
    async fn block_header(
        &self,
        ctx: &ChainContext,
        number: u64,
    ) -> anyhow::Result<RpcBlockHeader> {
        let chains = self.record(ctx, "block_header");

        anyhow::ensure!(number == chains.block.block.number, "unknown block {number}");

        Ok(chains.block.header.clone())
    }

    async fn account_proof(
        &self,
        ctx: &ChainContext,
        account: Address,
        slots: &[B256],
        number: u64,
    ) -> anyhow::Result<EIP1186AccountProofResponse> {
        let chains = self.record(ctx, "account_proof");

        anyhow::ensure!(number == chains.block.block.number, "unknown block {number}");
        anyhow::ensure!(account == chains.block.account, "no proof for {account}");
        anyhow::ensure!(slots == [chains.block.slot].as_slice(), "no proof for {slots:?}");

        let mut proof = chains.block.proof.clone();

        if chains.tamper_account_proof {
            let mut node = proof.account_proof[0].to_vec();
            node[3] ^= 0x01;
            proof.account_proof[0] = node.into();
        }

        Ok(proof)
    }

    async fn peripheral_nonce(
        &self,
        ctx: &ChainContext,
        peripheral: Address,
    ) -> anyhow::Result<U256> {
        drop(self.record(ctx, "peripheral_nonce"));

        anyhow::ensure!(peripheral == PERIPHERAL, "no peripheral at {peripheral}");

        Ok(U256::from(PERIPHERAL_NONCE))
    }
}

impl MultisigClient for MockChains {
    async fn nonce(&self, ctx: &ChainContext, safe: Address) -> anyhow::Result<U256> {
        let chains = self.record(ctx, "nonce");

        if safe == MAIN_SAFE {
            Ok(chains.main_safe_nonce)
        } else if safe == SOURCE_SAFE {
            Ok(chains.source_safe_nonce)
        } else {
            anyhow::bail!("no safe at {safe}")
        }
    }

    async fn transaction_hash(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
    ) -> anyhow::Result<B256> {
        drop(self.record(ctx, "transaction_hash"));

        Ok(tx.hash(ctx.chain_id, safe))
    }

    async fn sign(&self, ctx: &ChainContext, hash: B256) -> anyhow::Result<Bytes> {
        let chains = self.record(ctx, "sign");

        anyhow::ensure!(!chains.reject_signing, "user denied the signature");

        let mut signature = [hash.0, hash.0, [0u8; 32]].concat();
        signature.truncate(65);
        signature[64] = 27;

        Ok(adjust_eth_sign_signature(&signature)?)
    }

    async fn execute(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx: &SafeTransaction,
        signatures: Bytes,
    ) -> anyhow::Result<B256> {
        let mut chains = self.record(ctx, "execute");

        if chains.reject_source_send {
            return Err(Reverted("execution reverted: GS013".into()).into());
        }

        chains.executions.push(Execution {
            safe,
            tx: tx.clone(),
            signatures,
        });

        Ok(keccak256(tx.hash(ctx.chain_id, safe)))
    }

    async fn wait_for_receipt(
        &self,
        ctx: &ChainContext,
        safe: Address,
        tx_hash: B256,
    ) -> anyhow::Result<ExecutionReceipt> {
        let chains = self.record(ctx, "wait_for_receipt");

        let (topic, status) = match (chains.revert_source, chains.fail_source_call) {
            (true, _) => (ISafe::ExecutionFailure::SIGNATURE_HASH, 0),
            (false, true) => (ISafe::ExecutionFailure::SIGNATURE_HASH, 1),
            (false, false) => (ISafe::ExecutionSuccess::SIGNATURE_HASH, 1),
        };

        let receipt = mined(tx_hash, chains.block.block.number, status, safe, topic);

        Ok(ExecutionReceipt {
            tx_hash,
            block_number: chains.block.block.number,
            success: safe_execution_succeeded(&receipt, safe),
        })
    }
}

impl ControllerModule for MockChains {
    async fn addresses(
        &self,
        ctx: &ChainContext,
        module: Address,
    ) -> anyhow::Result<ModuleAddresses> {
        drop(self.record(ctx, "addresses"));

        anyhow::ensure!(module == CONTROLLER_MODULE, "no module at {module}");

        Ok(ModuleAddresses {
            peripheral: PERIPHERAL,
            source_safe: SOURCE_SAFE,
            main_safe: MAIN_SAFE,
        })
    }

    /// Verifies the proof against the recorded source block the way the module does.
    async fn submit(
        &self,
        ctx: &ChainContext,
        module: Address,
        params: SafeTxParams,
        proof: ProofStruct,
        gas: u64,
    ) -> anyhow::Result<Submission> {
        let mut chains = self.record(ctx, "submit");

        anyhow::ensure!(module == CONTROLLER_MODULE, "no module at {module}");

        if keccak256(&proof.blockHeader) != chains.block.block.hash() {
            return Ok(Submission::Rejected {
                reason: "unknown block header".into(),
            });
        }

        let storage = nodes::decode_structured(&proof.storageProof)?;
        let value = trie::verify_proof(
            chains.block.record.storage_root,
            storage_path(chains.block.slot),
            &storage,
        );

        if value.is_err() {
            return Ok(Submission::Rejected {
                reason: "invalid storage proof".into(),
            });
        }

        if chains.revert_destination {
            let tx_hash = keccak256(&proof.blockHeader);
            let receipt = mined(tx_hash, 1, 0, MAIN_SAFE, ISafe::ExecutionFailure::SIGNATURE_HASH);

            return Ok(Submission::from_receipt(&receipt));
        }

        if !chains.consumed.insert(proof.nonce) {
            return Ok(Submission::Rejected {
                reason: "nonce already consumed".into(),
            });
        }

        let tx_hash = keccak256(&proof.blockHeader);

        chains.relayed.push(Relayed { params, proof, gas });
        chains.main_safe_nonce += U256::from(1);

        Ok(Submission::Accepted { tx_hash })
    }
}

/// Receipt of a mined transaction carrying one Safe execution event.
pub fn mined(tx_hash: B256, block: u64, status: u64, safe: Address, topic: B256) -> RpcReceipt {
    RpcReceipt {
        transaction_hash: tx_hash,
        block_number: Some(U64::from(block)),
        status: Some(U64::from(status)),
        logs: vec![RpcLog {
            address: safe,
            topics: vec![topic],
            data: [tx_hash.0, [0u8; 32]].concat().into(),
        }],
    }
}
