//! Network parameters
//!
//! Everything consensus-relevant that differs between networks: proof-of-work
//! limits, hard forks and their algorithm tables, version-bits deployments
//! and checkpoints. A `Params` value is built once per chain instance.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::consensus::{big_to_compact, Block, PowFunction};
use crate::crypto::Hash;
use crate::node::genesis_block;

/// Which network a node runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn is_test_network(&self) -> bool {
        !matches!(self, Network::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" | "reg" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// How the next target is derived from block history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetargetStrategy {
    /// Legacy scheme: mean of six capped interval ratios
    /// (all blocks, this algorithm, last day, last hour, last quarter hour,
    /// time since this algorithm last found a block)
    Blended,
    /// Plan9 scheme: EWMA of this algorithm's intervals blended with a
    /// neutral all-algorithm term
    Plan9,
}

/// A mining algorithm live during a hard fork
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmSpec {
    pub name: &'static str,
    /// Header version that selects this algorithm
    pub version: i32,
    /// Target seconds between blocks of this algorithm, divided by the
    /// number of live algorithms
    pub interval: u64,
    pub pow: PowFunction,
    /// Easiest target this algorithm may use (compact)
    pub pow_limit_bits: u32,
}

/// Identifies an algorithm within a specific hard fork
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgorithmKey {
    pub fork: usize,
    pub version: i32,
}

/// A consensus era with its own algorithm set and retarget rules
#[derive(Debug, Clone)]
pub struct HardFork {
    pub name: &'static str,
    pub activation_height: u32,
    /// Blocks at or below this height are never used as retarget samples
    pub averaging_floor: u32,
    /// Maximum number of timestamps collected per averaging series
    pub averaging_interval: usize,
    pub strategy: RetargetStrategy,
    /// Per-term adjustment factors are clamped to [1/cap, cap]
    pub adjustment_cap: f64,
    pub algorithms: Vec<AlgorithmSpec>,
    /// Algorithm used when the version matches none of the table entries
    pub fallback_algorithm: Option<&'static str>,
}

impl HardFork {
    pub fn algorithm_by_name(&self, name: &str) -> Option<&AlgorithmSpec> {
        self.algorithms.iter().find(|a| a.name == name)
    }

    pub fn algorithm_for_version(&self, version: i32) -> Option<&AlgorithmSpec> {
        self.algorithms
            .iter()
            .find(|a| a.version == version)
            .or_else(|| self.fallback_algorithm.and_then(|name| self.algorithm_by_name(name)))
    }
}

/// A version-bits soft fork deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: &'static str,
    pub bit: u8,
    /// Median time after which voting starts (next window)
    pub start_time: u64,
    /// Median time after which an unactivated deployment fails
    pub expire_time: u64,
}

/// A hard-coded known-good block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash,
}

/// Complete consensus parameters of one network
#[derive(Debug, Clone)]
pub struct Params {
    pub network: Network,
    /// Highest target any block may claim
    pub pow_limit: U256,
    pub pow_limit_bits: u32,
    /// Retarget period used to bound difficulty drops after a checkpoint
    pub target_timespan: u64,
    pub retarget_adjustment_factor: u64,
    pub reduce_min_difficulty: bool,
    pub min_diff_reduction_time: u64,
    pub rule_change_activation_threshold: u32,
    pub miner_confirmation_window: u32,
    pub deployments: Vec<Deployment>,
    pub checkpoints: Vec<Checkpoint>,
    pub hard_forks: Vec<HardFork>,
    pub genesis_block: Block,
    pub genesis_hash: Hash,
}

impl Params {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn mainnet() -> Self {
        let pow_limit = (U256::one() << 236) - U256::one();
        let genesis = genesis_block(1_405_686_858, big_to_compact(pow_limit));
        let genesis_hash = genesis.hash();
        Self {
            network: Network::Mainnet,
            pow_limit,
            pow_limit_bits: big_to_compact(pow_limit),
            target_timespan: 14 * 24 * 60 * 60,
            retarget_adjustment_factor: 4,
            reduce_min_difficulty: false,
            min_diff_reduction_time: 0,
            rule_change_activation_threshold: 1916,
            miner_confirmation_window: 2016,
            deployments: vec![
                Deployment {
                    name: "testdummy",
                    bit: 28,
                    start_time: 1_199_145_601,
                    expire_time: 1_230_767_999,
                },
                Deployment {
                    name: "csv",
                    bit: 0,
                    start_time: 1_462_060_800,
                    expire_time: 1_493_596_800,
                },
            ],
            checkpoints: vec![Checkpoint {
                height: 0,
                hash: genesis_hash,
            }],
            hard_forks: vec![
                legacy_fork(big_to_compact(pow_limit)),
                plan9_fork(250_000, 250_000, 0x1e00ffff),
            ],
            genesis_block: genesis,
            genesis_hash,
        }
    }

    pub fn testnet() -> Self {
        let pow_limit = (U256::one() << 239) - U256::one();
        let genesis = genesis_block(1_405_686_859, big_to_compact(pow_limit));
        let genesis_hash = genesis.hash();
        Self {
            network: Network::Testnet,
            pow_limit,
            pow_limit_bits: big_to_compact(pow_limit),
            target_timespan: 14 * 24 * 60 * 60,
            retarget_adjustment_factor: 4,
            reduce_min_difficulty: true,
            min_diff_reduction_time: 20 * 60,
            rule_change_activation_threshold: 1512,
            miner_confirmation_window: 2016,
            deployments: vec![
                Deployment {
                    name: "testdummy",
                    bit: 28,
                    start_time: 1_199_145_601,
                    expire_time: 1_230_767_999,
                },
                Deployment {
                    name: "csv",
                    bit: 0,
                    start_time: 1_456_790_400,
                    expire_time: 1_493_596_800,
                },
            ],
            checkpoints: vec![Checkpoint {
                height: 0,
                hash: genesis_hash,
            }],
            // test networks sample from an earlier height than they activate
            hard_forks: vec![
                legacy_fork(big_to_compact(pow_limit)),
                plan9_fork(1_000, 1, 0x1e7fffff),
            ],
            genesis_block: genesis,
            genesis_hash,
        }
    }

    pub fn regtest() -> Self {
        let pow_limit = (U256::one() << 255) - U256::one();
        let genesis = genesis_block(1_296_688_602, big_to_compact(pow_limit));
        let genesis_hash = genesis.hash();
        Self {
            network: Network::Regtest,
            pow_limit,
            pow_limit_bits: big_to_compact(pow_limit),
            target_timespan: 14 * 24 * 60 * 60,
            retarget_adjustment_factor: 4,
            reduce_min_difficulty: false,
            min_diff_reduction_time: 20 * 60,
            rule_change_activation_threshold: 108,
            miner_confirmation_window: 144,
            deployments: vec![
                Deployment {
                    name: "testdummy",
                    bit: 28,
                    start_time: 0,
                    expire_time: u64::MAX,
                },
                Deployment {
                    name: "csv",
                    bit: 0,
                    start_time: 0,
                    expire_time: u64::MAX,
                },
            ],
            checkpoints: Vec::new(),
            hard_forks: vec![
                legacy_fork(big_to_compact(pow_limit)),
                plan9_fork(2_000, 2_000, big_to_compact(pow_limit)),
            ],
            genesis_block: genesis,
            genesis_hash,
        }
    }

    /// Index of the hard fork governing blocks at `height`
    pub fn hard_fork_index(&self, height: u32) -> usize {
        self.hard_forks
            .iter()
            .rposition(|fork| fork.activation_height <= height)
            .unwrap_or(0)
    }

    pub fn hard_fork(&self, height: u32) -> &HardFork {
        &self.hard_forks[self.hard_fork_index(height)]
    }

    /// Algorithm a header version selects at `height`
    pub fn algorithm_for(&self, version: i32, height: u32) -> Option<&AlgorithmSpec> {
        self.hard_fork(height).algorithm_for_version(version)
    }

    pub fn algorithm_by_name(&self, name: &str, height: u32) -> Option<&AlgorithmSpec> {
        self.hard_fork(height).algorithm_by_name(name)
    }

    /// Key identifying the algorithm of a block, comparable across heights
    pub fn algorithm_key(&self, version: i32, height: u32) -> Option<AlgorithmKey> {
        let fork = self.hard_fork_index(height);
        self.hard_forks[fork]
            .algorithm_for_version(version)
            .map(|algo| AlgorithmKey {
                fork,
                version: algo.version,
            })
    }

    /// Largest timespan a single retarget may account for
    pub fn max_retarget_timespan(&self) -> u64 {
        self.target_timespan * self.retarget_adjustment_factor
    }

    pub fn checkpoint_at(&self, height: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.height == height)
    }
}

/// Pre-Plan9 era: sha256d by default, blake2b selected by the 514 magic
fn legacy_fork(pow_limit_bits: u32) -> HardFork {
    HardFork {
        name: "genesis",
        activation_height: 0,
        averaging_floor: 0,
        averaging_interval: 100,
        strategy: RetargetStrategy::Blended,
        adjustment_cap: 4.0,
        algorithms: vec![
            AlgorithmSpec {
                name: "sha256d",
                version: 2,
                interval: 300,
                pow: PowFunction::Sha256d,
                pow_limit_bits,
            },
            AlgorithmSpec {
                name: "blake2b",
                version: 514,
                interval: 300,
                pow: PowFunction::Blake2b,
                pow_limit_bits,
            },
        ],
        fallback_algorithm: Some("sha256d"),
    }
}

/// Plan9 era: nine algorithms on prime-second intervals
fn plan9_fork(activation_height: u32, averaging_floor: u32, pow_limit_bits: u32) -> HardFork {
    let table: [(&'static str, PowFunction, u64); 9] = [
        ("blake2b", PowFunction::Blake2b, 3),
        ("blake2s", PowFunction::Blake2s, 5),
        ("blake3", PowFunction::Blake3, 11),
        ("keccak", PowFunction::Keccak, 17),
        ("sha256d", PowFunction::Sha256d, 31),
        ("sha3-256", PowFunction::Sha3_256, 41),
        ("sha3-512", PowFunction::Sha3_512, 59),
        ("sha512d", PowFunction::Sha512d, 67),
        ("shake256", PowFunction::Shake256, 83),
    ];
    let algorithms = table
        .iter()
        .enumerate()
        .map(|(i, &(name, pow, interval))| AlgorithmSpec {
            name,
            version: 5 + i as i32,
            interval,
            pow,
            pow_limit_bits,
        })
        .collect();

    HardFork {
        name: "plan9",
        activation_height,
        averaging_floor,
        averaging_interval: 1600,
        strategy: RetargetStrategy::Plan9,
        adjustment_cap: 2.0,
        algorithms,
        fallback_algorithm: None,
    }
}
