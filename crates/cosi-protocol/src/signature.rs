use serde::{Deserialize, Serialize};

use crate::merkle::HashId;
use crate::suite::{self, Point, PublicKey, Secret};

/// Aggregate signature over a round's Merkle root.
///
/// Checked against the live aggregate key (the sum of the keys of every
/// node that contributed a response):
///
/// ```text
/// T = r̂·G + c·X̂ + E_V        valid ⟺ c == H(merkle_root ‖ T)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveSignature {
    pub challenge: Secret,
    pub response: Secret,
    /// Commitments of subtrees that committed but did not respond.
    pub exception_commit: Point,
    /// Keys excluded from this round.
    pub exceptions: Vec<PublicKey>,
}

impl CollectiveSignature {
    pub fn verify(&self, merkle_root: &HashId, agg_pubkey: &Point) -> bool {
        let t = suite::base_mul(&self.response) + agg_pubkey * self.challenge + self.exception_commit;
        suite::challenge_scalar(merkle_root, &t) == self.challenge
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::CosiError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::CosiError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
