//! Binary Merkle tree over an ordered list of serializable items.
//!
//! Leaves are the SHA-256 of each item's canonical JSON. An interior node is
//! the SHA-256 of the concatenated lowercase hex of its two children. A level
//! with an odd count pairs its last node with itself. Item order is taken
//! as given and never re-sorted.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_str, Digest};
use crate::error::CoreError;
use crate::serialize::hash_canonical;

/// Sentinel hashed to produce the root of an empty list
pub const EMPTY_ROOT_SENTINEL: &str = "empty";

/// Position of a proof sibling relative to the running hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Root of the empty tree
pub fn empty_root() -> Digest {
    hash_str(EMPTY_ROOT_SENTINEL)
}

/// Leaf digest for one item
pub fn leaf_hash<T: Serialize>(item: &T) -> Result<Digest, CoreError> {
    hash_canonical(item)
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut combined = String::with_capacity(128);
    combined.push_str(&left.to_hex());
    combined.push_str(&right.to_hex());
    hash_str(&combined)
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => hash_pair(left, right),
            [single] => hash_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

/// Merkle root over precomputed leaf digests
pub fn merkle_root_of_leaves(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return empty_root();
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Merkle root over serializable items
pub fn merkle_root<T: Serialize>(items: &[T]) -> Result<Digest, CoreError> {
    let leaves = items.iter().map(leaf_hash).collect::<Result<Vec<_>, _>>()?;
    Ok(merkle_root_of_leaves(&leaves))
}

/// Inclusion proof for the first leaf equal to `target`; empty if absent.
pub fn proof_for_leaf(leaves: &[Digest], target: &Digest) -> Vec<ProofStep> {
    let Some(mut index) = leaves.iter().position(|leaf| leaf == target) else {
        return Vec::new();
    };

    let mut proof = Vec::new();
    let mut level = leaves.to_vec();

    while level.len() > 1 {
        let step = if index % 2 == 0 {
            // Last node of an odd level is its own sibling.
            let sibling = level.get(index + 1).copied().unwrap_or(level[index]);
            ProofStep {
                sibling,
                side: Side::Right,
            }
        } else {
            ProofStep {
                sibling: level[index - 1],
                side: Side::Left,
            }
        };
        proof.push(step);

        level = next_level(&level);
        index /= 2;
    }

    proof
}

/// Inclusion proof for `target` within `items`
pub fn merkle_proof<T: Serialize>(items: &[T], target: &T) -> Result<Vec<ProofStep>, CoreError> {
    let leaves = items.iter().map(leaf_hash).collect::<Result<Vec<_>, _>>()?;
    let target = leaf_hash(target)?;
    Ok(proof_for_leaf(&leaves, &target))
}

/// Fold a proof from a leaf digest and compare against the expected root
pub fn verify_leaf(leaf: &Digest, proof: &[ProofStep], expected_root: &Digest) -> bool {
    let computed = proof.iter().fold(*leaf, |current, step| match step.side {
        Side::Left => hash_pair(&step.sibling, &current),
        Side::Right => hash_pair(&current, &step.sibling),
    });
    computed == *expected_root
}

/// Verify that `target` is included under `expected_root`
pub fn verify_proof<T: Serialize>(
    target: &T,
    proof: &[ProofStep],
    expected_root: &Digest,
) -> Result<bool, CoreError> {
    Ok(verify_leaf(&leaf_hash(target)?, proof, expected_root))
}
