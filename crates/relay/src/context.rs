use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::Context as _;

use crate::RpcClient;

/// Handle to one chain: its RPC endpoint and the node-managed account acting on it.
///
/// Every chain-facing call receives its context explicitly, so a source and a destination
/// context can be held side by side without a notion of a current network.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub name: String,
    pub chain_id: u64,
    pub account: Address,
    pub client: RpcClient,
    pub gas_price: Option<U256>,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl ChainContext {
    pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(
        name: impl Into<String>,
        chain_id: u64,
        account: Address,
        client: RpcClient,
    ) -> Self {
        Self {
            name: name.into(),
            chain_id,
            account,
            client,
            gas_price: None,
            receipt_poll_interval: Self::RECEIPT_POLL_INTERVAL,
            receipt_timeout: Self::RECEIPT_TIMEOUT,
        }
    }

    /// Connects to `url`, reading the chain id and, unless provided, the first node account.
    pub async fn connect(
        name: impl Into<String>,
        url: impl Into<String>,
        account: Option<Address>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let client = RpcClient::new(url);

        let chain_id = client
            .chain_id()
            .await
            .with_context(|| format!("failed to read the chain id of `{name}`"))?;

        let account = match account {
            Some(a) => a,
            None => client
                .accounts()
                .await
                .with_context(|| format!("failed to list the accounts of `{name}`"))?
                .first()
                .copied()
                .with_context(|| format!("`{name}` manages no account"))?,
        };

        tracing::info!("connected to `{name}` (chain {chain_id}) as {account}...");

        Ok(Self::new(name, chain_id, account, client))
    }

    pub fn with_gas_price(mut self, gas_price: Option<U256>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_receipt_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self.receipt_timeout = timeout;
        self
    }
}
