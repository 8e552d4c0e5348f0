//! Minimal JSON-RPC client for the node methods used by the relay.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use reqwest::Client;
use safe_controller_proofs::RpcBlockHeader;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("`{0}` returned no result")]
    MissingResult(&'static str),

    #[error("failed to decode the node response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RpcError {
    /// Returns the node message if the node rejected the request.
    pub fn node_message(&self) -> Option<&str> {
        match self {
            Self::Node { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeError {
    code: i64,
    message: String,
}

/// Transaction fields accepted by `eth_call` and `eth_sendTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
}

impl CallRequest {
    pub fn new(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to,
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(U64::from(gas));
        self
    }

    pub fn with_gas_price(mut self, gas_price: Option<U256>) -> Self {
        self.gas_price = gas_price;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Subset of `eth_getTransactionReceipt` the relay depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,

    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    /// Whether the transaction was included without reverting.
    pub fn succeeded(&self) -> bool {
        self.block_number.is_some() && self.status == Some(U64::from(1))
    }
}

#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        tracing::debug!("calling `{method}` on `{}`...", self.url);

        let mut response: Value = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error").cloned() {
            let NodeError { code, message } = serde_json::from_value(error)?;

            tracing::debug!("`{method}` rejected with {code}: {message}");

            return Err(RpcError::Node { code, message });
        }

        let result = response
            .get_mut("result")
            .map(Value::take)
            .ok_or(RpcError::MissingResult(method))?;

        Ok(serde_json::from_value(result)?)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.request("eth_chainId", serde_json::json!([])).await?;

        Ok(id.to::<u64>())
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.request("eth_accounts", serde_json::json!([])).await
    }

    pub async fn block_header(&self, number: u64) -> Result<RpcBlockHeader, RpcError> {
        let header: Option<RpcBlockHeader> = self
            .request("eth_getBlockByNumber", (U64::from(number), false))
            .await?;

        header.ok_or(RpcError::MissingResult("eth_getBlockByNumber"))
    }

    pub async fn proof(
        &self,
        account: Address,
        slots: &[B256],
        number: u64,
    ) -> Result<EIP1186AccountProofResponse, RpcError> {
        self.request("eth_getProof", (account, slots, U64::from(number)))
            .await
    }

    pub async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        self.request("eth_call", (request, "latest")).await
    }

    pub async fn send_transaction(&self, request: &CallRequest) -> Result<B256, RpcError> {
        self.request("eth_sendTransaction", (request,)).await
    }

    /// Signs `hash` with the node-managed `account` (`eth_sign`).
    pub async fn sign(&self, account: Address, hash: B256) -> Result<Bytes, RpcError> {
        self.request("eth_sign", (account, hash)).await
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", (hash,)).await
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    #[test]
    fn call_request_serializes_quantities() {
        let request = CallRequest::new(
            address!("1111111111111111111111111111111111111111"),
            address!("2222222222222222222222222222222222222222"),
            vec![0xde_u8, 0xad],
        )
        .with_gas(750_000);

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["from"], "0x1111111111111111111111111111111111111111");
        assert_eq!(json["data"], "0xdead");
        assert_eq!(json["gas"], "0xb71b0");
        assert!(json.get("value").is_none());
        assert!(json.get("gasPrice").is_none());
    }

    #[test]
    fn pending_receipt_fields_are_optional() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": B256::repeat_byte(1),
            "blockNumber": null,
            "status": null,
            "logs": []
        }))
        .unwrap();

        assert_eq!(receipt.block_number, None);
        assert_eq!(receipt.status, None);
        assert!(!receipt.succeeded());
    }

    #[test]
    fn receipt_logs_are_decoded() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": B256::repeat_byte(1),
            "blockNumber": "0x89544",
            "status": "0x1",
            "logs": [{
                "address": "0x5afe00000000000000000000000000000000000a",
                "topics": [B256::repeat_byte(2)],
                "data": "0x",
                "logIndex": "0x0",
                "removed": false
            }]
        }))
        .unwrap();

        assert!(receipt.succeeded());
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].topics, [B256::repeat_byte(2)]);

        let reverted = RpcReceipt {
            status: Some(U64::ZERO),
            ..receipt
        };

        assert!(!reverted.succeeded());
    }

    #[test]
    fn node_errors_expose_their_message() {
        let err = RpcError::Node {
            code: 3,
            message: "execution reverted".into(),
        };

        assert_eq!(err.node_message(), Some("execution reverted"));
        assert_eq!(RpcError::MissingResult("eth_call").node_message(), None);
    }
}
