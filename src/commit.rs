//! Merkle commitments over table chunks.
//!
//! Each chunk is hashed into a leaf with domain-separated BLAKE2b-256, and the
//! leaves are folded into a binary Merkle root.  A chunk can then be checked
//! against the root without touching the rest of the table.

use blake2::digest::{consts::U32, Digest};
use blake2::Blake2b;

use crate::table::Table;

/// 32-byte BLAKE2b digest.
pub type ChunkDigest = [u8; 32];

const CHUNK_DOMAIN: &[u8] = b"TABLE_FORGE_CHUNK";
const MERKLE_DOMAIN: &[u8] = b"TABLE_FORGE_MERKLE";

fn hash_pair(left: &ChunkDigest, right: &ChunkDigest) -> ChunkDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn hash_empty() -> ChunkDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update([1u8]); // empty marker
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Leaf digest of one chunk: width, first row index, then the elements.
pub fn chunk_digest(width: usize, first_row: usize, elements: &[u64]) -> ChunkDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(CHUNK_DOMAIN);
    hasher.update((width as u64).to_le_bytes());
    hasher.update((first_row as u64).to_le_bytes());
    for value in elements {
        hasher.update(value.to_le_bytes());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn merkle_levels(leaves: &[ChunkDigest]) -> Vec<Vec<ChunkDigest>> {
    let mut levels = vec![leaves.to_vec()];
    while levels.last().map_or(false, |level| level.len() > 1) {
        let level = &levels[levels.len() - 1];
        let next = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        levels.push(next);
    }
    levels
}

/// Computes the Merkle root for the provided leaf digests.
pub fn merkle_root(leaves: &[ChunkDigest]) -> ChunkDigest {
    if leaves.is_empty() {
        return hash_empty();
    }
    merkle_levels(leaves)
        .last()
        .and_then(|level| level.first().copied())
        .unwrap_or_else(hash_empty)
}

/// Sibling hash on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProofNode {
    /// Sibling digest that must be paired with the running hash.
    pub sibling: ChunkDigest,
    /// `true` if the sibling is on the left-hand side of the pair.
    pub left: bool,
}

/// Inclusion proof for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProof {
    /// Root the proof commits to.
    pub root: ChunkDigest,
    /// Digest of the proven chunk.
    pub leaf: ChunkDigest,
    /// Chunk index.
    pub index: usize,
    /// Siblings from leaf level upwards.
    pub path: Vec<MerkleProofNode>,
}

/// Builds an inclusion proof for leaf `index`.
pub fn build_proof(leaves: &[ChunkDigest], index: usize) -> Option<ChunkProof> {
    let leaf = *leaves.get(index)?;
    let levels = merkle_levels(leaves);
    let mut path = Vec::new();
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            path.push(MerkleProofNode {
                sibling: level[sibling],
                left: sibling < idx,
            });
        }
        idx /= 2;
    }
    Some(ChunkProof {
        root: merkle_root(leaves),
        leaf,
        index,
        path,
    })
}

/// Recomputes the root from `proof.leaf` and its path.
pub fn verify_chunk_proof(proof: &ChunkProof) -> bool {
    let computed = proof.path.iter().fold(proof.leaf, |acc, node| {
        if node.left {
            hash_pair(&node.sibling, &acc)
        } else {
            hash_pair(&acc, &node.sibling)
        }
    });
    computed == proof.root
}

/// Chunk digests and their Merkle root for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCommitment {
    /// Merkle root over `leaves`.
    pub root: ChunkDigest,
    /// One digest per chunk, in chunk order.
    pub leaves: Vec<ChunkDigest>,
}

impl TableCommitment {
    /// Hex encoding of the root.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Inclusion proof for chunk `index`.
    pub fn chunk_proof(&self, index: usize) -> Option<ChunkProof> {
        build_proof(&self.leaves, index)
    }
}

impl Table {
    /// Commits to the table's contents chunk by chunk.
    pub fn commitment(&self) -> TableCommitment {
        let leaves: Vec<ChunkDigest> = self
            .chunks()
            .iter()
            .enumerate()
            .map(|(idx, chunk)| chunk_digest(self.width(), idx * self.chunk_rows(), chunk))
            .collect();
        TableCommitment {
            root: merkle_root(&leaves),
            leaves,
        }
    }
}
