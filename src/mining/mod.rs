//! Mining module
//!
//! Block templates on the validated tip and the nonce search.

mod miner;

pub use miner::*;
