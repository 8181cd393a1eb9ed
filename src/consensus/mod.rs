//! Consensus module - Block structure, compact targets, PoW and sanity checks

mod block;
mod compact;
mod difficulty;
mod pow;
mod transaction;
mod validation;

pub use block::*;
pub use compact::*;
pub use difficulty::*;
pub use pow::*;
pub use transaction::*;
pub use validation::*;
