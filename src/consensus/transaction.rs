//! Transaction structure
//!
//! Only the structure needed for block sanity checks (coinbase position,
//! merkle commitment, duplicates). Script validation happens elsewhere.

use serde::{Deserialize, Serialize};
use crate::crypto::{hash_bytes, Hash};

/// Output index marking the null outpoint of a coinbase input
pub const COINBASE_OUTPUT_INDEX: u32 = 0xFFFF_FFFF;

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            tx_hash: Hash::zero(),
            index: COINBASE_OUTPUT_INDEX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.tx_hash == Hash::zero() && self.index == COINBASE_OUTPUT_INDEX
    }
}

/// A transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script: Vec<u8>,
    pub sequence: u32,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units
    pub amount: u64,
    pub script: Vec<u8>,
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Create a coinbase transaction
    ///
    /// The block height is committed in the input script so coinbases of
    /// different blocks never share a hash.
    pub fn coinbase(height: u32, amount: u64, payout_script: Vec<u8>) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                script: height.to_le_bytes().to_vec(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                amount,
                script: payout_script,
            }],
            lock_time: 0,
        }
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Calculate transaction hash
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.previous_output.tx_hash.0);
            bytes.extend_from_slice(&input.previous_output.index.to_le_bytes());
            bytes.extend_from_slice(&(input.script.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&input.script);
            bytes.extend_from_slice(&input.sequence.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&(output.script.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&output.script);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }
}
