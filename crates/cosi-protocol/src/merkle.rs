//! Merkle aggregation over a round's leaves.
//!
//! Leaf hashing: `SHA-256(0x00 ‖ data)`.
//! Interior hashing: `SHA-256(0x01 ‖ min(a, b) ‖ max(a, b))`. Pairs are
//! ordered by value, so a proof is just the list of sibling hashes with no
//! left/right bits, and a subtree proof can be lifted to a larger tree by
//! appending the parent's proof.
//!
//! Odd node count: the last node is carried up to the next level unchanged.
//! Empty input: zero root. One leaf: the root is the leaf itself.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest.
pub type HashId = [u8; 32];

/// Root of an empty tree.
pub const ZERO_HASH: HashId = [0u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Hash arbitrary bytes into a leaf.
pub fn hash_bytes(data: &[u8]) -> HashId {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_pair(a: &HashId, b: &HashId) -> HashId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

/// Inclusion proof: sibling hashes from a leaf up to a root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(pub Vec<HashId>);

impl Proof {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Root reached by folding `leaf` with every sibling.
    pub fn calc(&self, leaf: &HashId) -> HashId {
        self.0.iter().fold(*leaf, |acc, sibling| hash_pair(&acc, sibling))
    }

    pub fn check(&self, root: &HashId, leaf: &HashId) -> bool {
        self.calc(leaf) == *root
    }

    /// Append `parent`, lifting a subtree proof to the parent's root.
    pub fn extend(&mut self, parent: &Proof) {
        self.0.extend_from_slice(&parent.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build a tree over `leaves` (caller sorts them) and return the root plus
/// one proof per leaf, in input order.
pub fn proof_tree(leaves: &[HashId]) -> (HashId, Vec<Proof>) {
    if leaves.is_empty() {
        return (ZERO_HASH, Vec::new());
    }

    let mut proofs = vec![Proof::new(); leaves.len()];
    // Position of each original leaf within the current level.
    let mut positions: Vec<usize> = (0..leaves.len()).collect();
    let mut level = leaves.to_vec();

    while level.len() > 1 {
        for (leaf, pos) in positions.iter_mut().enumerate() {
            let sibling = *pos ^ 1;
            if sibling < level.len() {
                proofs[leaf].0.push(level[sibling]);
            }
            *pos /= 2;
        }

        level = level
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => hash_pair(a, b),
                _ => pair[0],
            })
            .collect();
    }

    (level[0], proofs)
}
