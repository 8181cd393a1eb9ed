//! Proof-of-work hash functions
//!
//! Each mining algorithm hashes the serialized header with its own digest.
//! Digests wider than 256 bits are truncated to their first 32 bytes.

use blake2::{Blake2b512, Blake2s256};
use sha2::{Digest, Sha256, Sha512};
use sha3::{Keccak256, Sha3_256, Sha3_512};

use crate::consensus::BlockHeader;
use crate::crypto::Hash;

/// Hash function used by a mining algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowFunction {
    Blake2b,
    Blake2s,
    Blake3,
    Keccak,
    Sha256d,
    Sha3_256,
    Sha3_512,
    Sha512d,
    Shake256,
}

impl PowFunction {
    /// Proof-of-work hash of raw header bytes
    pub fn hash(&self, data: &[u8]) -> Hash {
        match self {
            PowFunction::Blake2b => truncate(&Blake2b512::digest(data)),
            PowFunction::Blake2s => truncate(&Blake2s256::digest(data)),
            PowFunction::Blake3 => Hash(*blake3::hash(data).as_bytes()),
            PowFunction::Keccak => truncate(&Keccak256::digest(data)),
            PowFunction::Sha256d => truncate(&Sha256::digest(Sha256::digest(data))),
            PowFunction::Sha3_256 => truncate(&Sha3_256::digest(data)),
            PowFunction::Sha3_512 => truncate(&Sha3_512::digest(data)),
            PowFunction::Sha512d => truncate(&Sha512::digest(Sha512::digest(data))),
            PowFunction::Shake256 => shake256(data),
        }
    }

    /// Proof-of-work hash of a block header
    pub fn hash_header(&self, header: &BlockHeader) -> Hash {
        self.hash(&header.to_bytes())
    }
}

fn truncate(digest: &[u8]) -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash(out)
}

fn shake256(data: &[u8]) -> Hash {
    use sha3::digest::{ExtendableOutput, Update, XofReader};

    let mut hasher = sha3::Shake256::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 32];
    reader.read(&mut out);
    Hash(out)
}
