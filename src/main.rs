//! Parallel Chain (PC) Node
//!
//! Opens the block database, validates the stored chain and runs a local
//! mining loop that feeds every mined block back through block processing.

use clap::Parser;
use pc_core::chain::BlockChain;
use pc_core::consensus::BehaviorFlags;
use pc_core::constants::CHAIN_FULL_NAME;
use pc_core::mining::{Miner, MiningResult};
use pc_core::node::{init_logging, GenesisInfo, LogFormat, NodeConfig};
use pc_core::params::{Network, Params};
use pc_core::storage::SledStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pc-node", about = "Parallel Chain validation node")]
struct Cli {
    /// Path to a TOML configuration file. CLI flags and env vars override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Network: "mainnet", "testnet" or "regtest"
    #[arg(long, env = "PC_NETWORK")]
    network: Option<Network>,

    /// Data directory for the block database
    #[arg(long, env = "PC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "debug,pc_core=trace"
    #[arg(long, env = "PC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json"
    #[arg(long, env = "PC_LOG_FORMAT")]
    log_format: Option<String>,

    /// Number of blocks to mine before exiting (0 = until ctrl-c)
    #[arg(long)]
    mine_blocks: Option<u64>,

    /// Mining algorithm name
    #[arg(long)]
    algorithm: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

impl Cli {
    fn into_config(self) -> Result<(NodeConfig, bool), Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(count) = self.mine_blocks {
            config.mine_blocks = count;
        }
        if let Some(algorithm) = self.algorithm {
            config.mining_algorithm = algorithm;
        }
        Ok((config, self.dump_config))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, dump_config) = Cli::parse().into_config()?;
    if dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(config.log_format.parse::<LogFormat>()?, &config.log_level)?;

    let params = Params::for_network(config.network);
    let genesis = GenesisInfo::new(&params.genesis_block);
    info!(
        chain = CHAIN_FULL_NAME,
        network = %config.network,
        genesis = %genesis.hash,
        data_dir = %config.data_dir.display(),
        "Starting node"
    );

    let store = Arc::new(SledStore::open(config.data_dir.join(config.network.to_string()))?);
    let chain = Arc::new(BlockChain::new(params, store.clone())?);
    info!(snapshot = %serde_json::to_string(&chain.snapshot())?, "Chain loaded");

    let miner = Miner::new(b"pc-node".to_vec());
    let mining = tokio::spawn(mining_loop(
        chain.clone(),
        miner.clone(),
        config.mining_algorithm.clone(),
        config.mine_blocks,
    ));

    tokio::select! {
        result = mining => {
            if let Err(e) = result {
                error!(error = %e, "Mining task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            miner.stop();
        }
    }

    store.flush()?;
    info!(height = chain.best_height(), tip = %chain.best_hash(), "Node stopped");
    Ok(())
}

/// Mine `count` blocks (or forever when 0) on the best tip
async fn mining_loop(chain: Arc<BlockChain>, miner: Miner, algorithm: String, count: u64) {
    let mut mined = 0u64;
    while count == 0 || mined < count {
        let (template, spec) = match miner.assemble_block(&chain, &algorithm) {
            Ok(template) => template,
            Err(e) => {
                error!(error = %e, "Failed to assemble block template");
                return;
            }
        };

        let worker = miner.clone();
        let result = tokio::task::spawn_blocking(move || worker.mine_block(template, &spec)).await;
        let block = match result {
            Ok(Ok(MiningResult::Success(block))) => block,
            Ok(Ok(MiningResult::Interrupted)) => return,
            Ok(Err(e)) => {
                error!(error = %e, "Mining failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Mining worker panicked");
                return;
            }
        };

        match chain.process_block(&block, BehaviorFlags::NONE, 0) {
            Ok(outcome) if outcome.is_main_chain => {
                mined += 1;
                info!(
                    height = chain.best_height(),
                    hash = %block.hash(),
                    bits = format!("{:08x}", block.header.bits),
                    "Mined block"
                );
            }
            Ok(_) => warn!(hash = %block.hash(), "Mined block did not extend the main chain"),
            Err(e) => {
                error!(hash = %block.hash(), error = %e, "Mined block rejected");
                return;
            }
        }
    }
}
