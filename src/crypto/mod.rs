//! Cryptography module - block identity hashing and Merkle trees

mod hash;
mod merkle;

pub use hash::*;
pub use merkle::*;
