//! Chain errors

use thiserror::Error;

use crate::consensus::{ErrorCode, RuleError};
use crate::crypto::Hash;
use crate::storage::StoreError;

/// Errors returned by block processing and chain queries
#[derive(Debug, Error)]
pub enum ChainError {
    /// The block broke a consensus rule
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Unknown block {0}")]
    UnknownBlock(Hash),
    #[error("Unknown algorithm '{name}' at height {height}")]
    UnknownAlgorithm { name: String, height: u32 },
    #[error("Target {0:08x} cannot be decoded")]
    InvalidTarget(u32),
    #[error("Genesis mismatch: store has {stored}, network expects {expected}")]
    GenesisMismatch { stored: Hash, expected: Hash },
    #[error("Corrupt chain state: {0}")]
    Corrupt(String),
}

impl ChainError {
    /// Rule violated, if this is a rule error
    pub fn rule_code(&self) -> Option<ErrorCode> {
        match self {
            ChainError::Rule(rule) => Some(rule.code),
            _ => None,
        }
    }
}

pub(crate) fn rule_error(code: ErrorCode, description: impl Into<String>) -> ChainError {
    ChainError::Rule(RuleError::new(code, description))
}
