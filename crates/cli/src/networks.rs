use alloy_primitives::{Address, U256};
use anyhow::Context as _;
use safe_controller_relay::{ChainContext, RpcClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub name: &'static str,
    pub chain_id: u64,
    pub url: Option<&'static str>,

    /// Legacy gas price in wei, when the network needs one.
    pub gas_price: Option<u64>,
}

const fn network(
    name: &'static str,
    chain_id: u64,
    url: Option<&'static str>,
    milli_gwei: u64,
) -> Network {
    let gas_price = if milli_gwei == 0 {
        None
    } else {
        Some(milli_gwei * 1_000_000)
    };

    Network {
        name,
        chain_id,
        url,
        gas_price,
    }
}

/// Known networks; gas prices are expressed in milli-gwei.
pub const NETWORKS: &[Network] = &[
    network("arbitrum", 42161, None, 100),
    network("avalanche", 43114, Some("https://api.avax.network/ext/bc/C/rpc"), 230_000),
    network("avalanche-fuji", 43113, None, 10_000),
    network("bsc", 56, Some("https://bsc-dataseed1.binance.org"), 3_000),
    network("bsc-testnet", 97, None, 3_000),
    network("chiado", 10200, Some("https://rpc.chiadochain.net/"), 0),
    network("gnosis", 100, Some("https://rpc.gnosis.gateway.fm"), 15_000),
    network("goerli", 5, None, 1_000),
    network("hardhat", 31337, Some("http://127.0.0.1:8545"), 0),
    network("mainnet", 1, Some("https://ethereum.publicnode.com"), 42_000),
    network("optimism", 10, None, 50),
    network("optimism-goerli", 420, None, 50),
    network("polygon", 137, None, 200_000),
    network("polygon-mumbai", 80001, None, 0),
    network("sepolia", 11155111, None, 0),
];

pub fn find(name: &str) -> Option<&'static Network> {
    NETWORKS.iter().find(|n| n.name == name)
}

/// RPC endpoint of a command line target, either a known network name or a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub network: Option<&'static Network>,
}

impl Endpoint {
    pub fn resolve(target: &str) -> anyhow::Result<Self> {
        Self::resolve_with(target, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(target: &str, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if target.contains("://") {
            return Ok(Self {
                name: target.to_string(),
                url: target.to_string(),
                network: None,
            });
        }

        let network = find(target).with_context(|| format!("unknown network `{target}`"))?;
        let key = format!("{}_JSON_RPC_URL", target.to_uppercase().replace('-', "_"));

        let url = match (env(&key), network.url) {
            (Some(url), _) => url,
            (None, Some(url)) => url.to_string(),
            (None, None) => {
                let api_key = env("INFURA_API_KEY").with_context(|| {
                    format!("`{target}` needs either `{key}` or `INFURA_API_KEY`")
                })?;

                format!("https://{target}.infura.io/v3/{api_key}")
            }
        };

        Ok(Self {
            name: target.to_string(),
            url,
            network: Some(network),
        })
    }

    /// Connects with the node-managed `account`, or the first account of the node.
    pub async fn connect(&self, account: Option<Address>) -> anyhow::Result<ChainContext> {
        let ctx = ChainContext::connect(&self.name, &self.url, account).await?;

        self.check(ctx.chain_id)?;

        let gas_price = self.network.and_then(|n| n.gas_price).map(U256::from);

        Ok(ctx.with_gas_price(gas_price))
    }

    /// Connects for reads only; no account is needed.
    pub async fn read_only(&self) -> anyhow::Result<ChainContext> {
        let client = RpcClient::new(&self.url);
        let chain_id = client
            .chain_id()
            .await
            .with_context(|| format!("failed to read the chain id of `{}`", self.name))?;

        self.check(chain_id)?;

        Ok(ChainContext::new(&self.name, chain_id, Address::ZERO, client))
    }

    fn check(&self, chain_id: u64) -> anyhow::Result<()> {
        if let Some(network) = self.network {
            anyhow::ensure!(
                network.chain_id == chain_id,
                "`{}` expects chain {}, the node reports {chain_id}",
                self.name,
                network.chain_id
            );
        }

        Ok(())
    }
}
