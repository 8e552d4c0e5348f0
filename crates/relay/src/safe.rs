//! Safe transactions and the contract bindings of the relay.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, Eip712Domain, SolCall as _, SolEvent as _, SolStruct as _};
use safe_controller_proofs::ProofBundle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RpcReceipt;

sol! {
    /// EIP-712 typed `SafeTx`, signed by the owners to approve a transaction.
    #[derive(Debug, PartialEq, Eq)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    /// Destination Safe transaction relayed through the controller module.
    #[derive(Debug, PartialEq, Eq)]
    struct SafeTxParams {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        bytes signatures;
    }

    /// Storage proof of the source chain peripheral, checked by the controller module.
    #[derive(Debug, PartialEq, Eq)]
    struct ProofStruct {
        uint256 blockNumber;
        uint256 nonce;
        bytes blockHeader;
        bytes accountProof;
        bytes storageProof;
    }

    interface ISafe {
        function nonce() external view returns (uint256);

        function getTransactionHash(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);

        event ExecutionSuccess(bytes32 txHash, uint256 payment);
        event ExecutionFailure(bytes32 txHash, uint256 payment);
    }

    interface IPeripheral {
        function nonce() external view returns (uint256);

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external returns (bool success);
    }

    interface IControllerModule {
        function PERIPHERAL() external view returns (address);
        function SOURCE_SAFE() external view returns (address);
        function MAIN_SAFE() external view returns (address);

        function execTransaction(
            SafeTxParams calldata params,
            ProofStruct calldata proof
        ) external returns (bool success);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: U256,
}

impl SafeTransaction {
    pub fn eip712(&self) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: self.nonce,
        }
    }

    /// EIP-712 hash approved by the owners of `safe`.
    pub fn hash(&self, chain_id: u64, safe: Address) -> B256 {
        let domain = Eip712Domain::new(None, None, Some(U256::from(chain_id)), Some(safe), None);

        self.eip712().eip712_signing_hash(&domain)
    }

    pub fn params(&self, signatures: Bytes) -> SafeTxParams {
        SafeTxParams {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            signatures,
        }
    }

    /// `getTransactionHash` call of the owning Safe.
    pub fn hash_call(&self) -> ISafe::getTransactionHashCall {
        ISafe::getTransactionHashCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            _nonce: self.nonce,
        }
    }

    /// `execTransaction` call of the owning Safe.
    pub fn exec_calldata(&self, signatures: Bytes) -> Bytes {
        ISafe::execTransactionCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            signatures,
        }
        .abi_encode()
        .into()
    }

    /// Peripheral `execTransaction` call that records this transaction on the source chain.
    pub fn peripheral_calldata(&self, signatures: Bytes) -> Bytes {
        IPeripheral::execTransactionCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            signatures,
        }
        .abi_encode()
        .into()
    }
}

impl From<&ProofBundle> for ProofStruct {
    fn from(bundle: &ProofBundle) -> Self {
        Self {
            blockNumber: U256::from(bundle.block_number),
            nonce: bundle.nonce,
            blockHeader: bundle.block_header.clone(),
            accountProof: bundle.account_proof.clone(),
            storageProof: bundle.storage_proof.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("expected a 65 bytes signature, got {0} bytes")]
    Length(usize),

    #[error("unexpected signature recovery byte {0}")]
    RecoveryByte(u8),
}

/// Signature of an owner that is also the transaction sender, validated by the Safe itself.
pub fn prevalidated_signature(owner: Address) -> Bytes {
    let mut signature = [0u8; 65];

    signature[..32].copy_from_slice(owner.into_word().as_slice());
    signature[64] = 1;

    Bytes::copy_from_slice(&signature)
}

/// Marks an `eth_sign` signature so the Safe recovers it from the prefixed message hash.
pub fn adjust_eth_sign_signature(signature: &[u8]) -> Result<Bytes, SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::Length(signature.len()));
    }

    let mut adjusted = signature.to_vec();

    adjusted[64] = match adjusted[64] {
        v @ (0 | 1) => v + 31,
        v @ (27 | 28) => v + 4,
        v => return Err(SignatureError::RecoveryByte(v)),
    };

    Ok(adjusted.into())
}

/// Whether `safe` executed its transaction in `receipt`.
///
/// With a nonzero `safeTxGas` a failing inner call does not revert the outer
/// transaction; the Safe only emits `ExecutionFailure`.
pub fn safe_execution_succeeded(receipt: &RpcReceipt, safe: Address) -> bool {
    receipt.succeeded()
        && !receipt.logs.iter().any(|log| {
            log.address == safe
                && log.topics.first() == Some(&ISafe::ExecutionFailure::SIGNATURE_HASH)
        })
}
