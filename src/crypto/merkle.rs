//! Merkle root computation over transaction hashes

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of hashes
///
/// An empty list yields the zero hash. Odd levels duplicate their last element.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    let mut level: Vec<Hash> = hashes.to_vec();
    if level.is_empty() {
        return Hash::zero();
    }

    while level.len() > 1 {
        if let Some(&last) = level.last().filter(|_| level.len() % 2 == 1) {
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash_bytes(&i.to_le_bytes())).collect()
    }

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(compute_merkle_root(&[]), Hash::zero());
    }

    #[test]
    fn test_single_element() {
        let hashes = make_hashes(1);
        assert_eq!(compute_merkle_root(&hashes), hashes[0]);
    }

    #[test]
    fn test_two_elements() {
        let hashes = make_hashes(2);
        assert_eq!(compute_merkle_root(&hashes), hash_pair(&hashes[0], &hashes[1]));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let hashes = make_hashes(3);
        let left = hash_pair(&hashes[0], &hashes[1]);
        let right = hash_pair(&hashes[2], &hashes[2]);
        assert_eq!(compute_merkle_root(&hashes), hash_pair(&left, &right));
    }
}
