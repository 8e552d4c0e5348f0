use std::time::Duration;

use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use safe_controller_proofs::{encode_header, BlockHeader, RpcBlockHeader};
use safe_controller_relay::{
    build_proof_bundle, ChainReader as _, JsonRpc, ProofRequest, RelayAction, RelayPlan,
    RelaySession,
};
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use crate::networks::Endpoint;

mod networks;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encodes a block header and checks its hash against the node.
    Header {
        /// Network name or JSON-RPC URL.
        #[arg(short, long, value_name = "RPC", env = "RPC_URL")]
        rpc: String,

        /// Block number.
        #[arg(short, long, value_name = "BLOCK")]
        block: u64,
    },

    /// Builds a verified storage proof bundle for a peripheral mapping entry.
    Proof {
        /// Network name or JSON-RPC URL.
        #[arg(short, long, value_name = "RPC", env = "RPC_URL")]
        rpc: String,

        /// Block number.
        #[arg(short, long, value_name = "BLOCK")]
        block: u64,

        /// Peripheral holding the mapping.
        #[arg(short, long, value_name = "ADDRESS")]
        account: Address,

        /// Mapping key, usually the source Safe.
        #[arg(short, long, value_name = "ADDRESS")]
        key_address: Address,

        /// Declaration slot of the mapping.
        #[arg(long, value_name = "SLOT", default_value = "0")]
        slot_index: U256,

        /// Relayed nonce; read from the peripheral when omitted.
        #[arg(short, long, value_name = "NONCE")]
        nonce: Option<U256>,
    },

    /// Relays a Safe transaction from a source chain to a destination chain.
    #[command(subcommand)]
    Relay(Relay),
}

#[derive(Subcommand)]
enum Relay {
    /// Relays a native token transfer from the main Safe.
    SendNativeToken {
        /// Source network name or JSON-RPC URL.
        #[arg(long, value_name = "RPC", env = "SOURCE_RPC_URL")]
        source: String,

        /// Destination network name or JSON-RPC URL.
        #[arg(long, value_name = "RPC", env = "DESTINATION_RPC_URL")]
        destination: String,

        /// Controller module on the destination chain.
        #[arg(short, long, value_name = "ADDRESS")]
        controller_module: Address,

        /// Recipient; defaults to the destination account.
        #[arg(long, value_name = "ADDRESS")]
        to: Option<Address>,

        /// Amount in wei.
        #[arg(long, value_name = "WEI", default_value = "1")]
        value: U256,

        /// Node-managed account signing on the source chain.
        #[arg(long, value_name = "ADDRESS")]
        source_account: Option<Address>,

        /// Node-managed account signing on the destination chain.
        #[arg(long, value_name = "ADDRESS")]
        destination_account: Option<Address>,

        /// Gas price of the relayed Safe transaction.
        #[arg(long, value_name = "WEI", default_value = "1000000000")]
        gas_price: U256,

        #[arg(long, value_name = "GAS", default_value = "0")]
        safe_tx_gas: U256,

        #[arg(long, value_name = "GAS", default_value = "0")]
        base_gas: U256,

        /// Safe gas of the source execution on the peripheral.
        #[arg(long, value_name = "GAS", default_value = "500000")]
        source_safe_tx_gas: U256,

        /// Gas limit of the destination submission.
        #[arg(long, value_name = "GAS", default_value = "750000")]
        destination_gas: u64,

        /// Mapping key of the proven slot; defaults to the source Safe.
        #[arg(long, value_name = "ADDRESS")]
        key_address: Option<Address>,

        #[arg(long, value_name = "SLOT", default_value = "0")]
        slot_index: U256,

        /// Receipt poll interval, in milliseconds.
        #[arg(long, value_name = "MS", default_value = "2000")]
        poll_interval: u64,

        /// Receipt timeout, in seconds.
        #[arg(long, value_name = "SECS", default_value = "300")]
        timeout: u64,
    },
}

/// Encoded header of `block`, failing unless it hashes to the hash reported by the node.
fn header_report(block: u64, header: &RpcBlockHeader) -> anyhow::Result<serde_json::Value> {
    let reported = header.reported_hash()?;
    let header = BlockHeader::try_from(header)?;
    let computed = header.hash();

    anyhow::ensure!(
        computed == reported,
        "block {block} hashes to {computed}, the node reports {reported}"
    );

    Ok(serde_json::json!({
        "number": block,
        "header": encode_header(&header),
        "hash": computed,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { cmd } = Cli::parse();

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let result = match cmd {
        Commands::Header { rpc, block } => {
            let ctx = Endpoint::resolve(&rpc)?.read_only().await?;
            let header = JsonRpc.block_header(&ctx, block).await?;

            header_report(block, &header)?
        }

        Commands::Proof {
            rpc,
            block,
            account,
            key_address,
            slot_index,
            nonce,
        } => {
            let ctx = Endpoint::resolve(&rpc)?.read_only().await?;
            let nonce = match nonce {
                Some(n) => n,
                None => JsonRpc.peripheral_nonce(&ctx, account).await?,
            };

            let request = ProofRequest::for_mapping(block, account, key_address, slot_index, nonce);
            let bundle = build_proof_bundle(&JsonRpc, &ctx, &request).await?;

            serde_json::to_value(&bundle)?
        }

        Commands::Relay(Relay::SendNativeToken {
            source,
            destination,
            controller_module,
            to,
            value,
            source_account,
            destination_account,
            gas_price,
            safe_tx_gas,
            base_gas,
            source_safe_tx_gas,
            destination_gas,
            key_address,
            slot_index,
            poll_interval,
            timeout,
        }) => {
            let source = Endpoint::resolve(&source)?
                .connect(source_account)
                .await?
                .with_receipt_polling(
                    Duration::from_millis(poll_interval),
                    Duration::from_secs(timeout),
                );
            let destination = Endpoint::resolve(&destination)?
                .connect(destination_account)
                .await?
                .with_receipt_polling(
                    Duration::from_millis(poll_interval),
                    Duration::from_secs(timeout),
                );

            let mut action = RelayAction::native_transfer(to.unwrap_or(destination.account), value);
            action.gas_price = gas_price;
            action.safe_tx_gas = safe_tx_gas;
            action.base_gas = base_gas;

            let mut plan =
                RelayPlan::resolve(&JsonRpc, &destination, controller_module, action).await?;
            plan.source_safe_tx_gas = source_safe_tx_gas;
            plan.destination_gas = destination_gas;
            plan.slot_index = slot_index;

            if let Some(key) = key_address {
                plan.slot_key = key;
            }

            let receipt = RelaySession::new(source, destination, plan, JsonRpc)
                .run()
                .await?;

            tracing::info!(
                "relayed through block {} with source tx {} and destination tx {}",
                receipt.block_number,
                receipt.source_tx,
                receipt.destination_tx
            );

            serde_json::json!({
                "sourceTx": receipt.source_tx,
                "blockNumber": receipt.block_number,
                "destinationTx": receipt.destination_tx,
                "safeTxNonce": receipt.transaction.nonce,
                "peripheralNonce": receipt.bundle.nonce,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
