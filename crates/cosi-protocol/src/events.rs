use crate::merkle::{HashId, Proof};
use crate::message::VoteOutcome;
use crate::signature::CollectiveSignature;
use crate::suite::{Point, PublicKey};
use crate::types::{NodeName, RoundNumber, ViewNumber};

/// A round that verified at this node.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round: RoundNumber,
    pub view: ViewNumber,
    pub node: NodeName,
    /// Live aggregate key of this node's subtree (exceptions removed).
    pub agg_pubkey: Point,
    pub exceptions: Vec<PublicKey>,
    /// Root of this node's subtree.
    pub merkle_root: HashId,
}

/// Completed round at the root.
#[derive(Debug, Clone)]
pub struct RoundDone {
    pub round: RoundNumber,
    pub view: ViewNumber,
    pub merkle_root: HashId,
    pub log_hash: HashId,
    /// Proof of `log_hash` against `merkle_root`.
    pub proof: Proof,
    pub signature: CollectiveSignature,
    /// Key the signature verifies under.
    pub agg_pubkey: Point,
}

/// Events a node surfaces to the application.
#[derive(Debug, Clone)]
pub enum CosiEvent {
    /// Responses verified at this node.
    RoundVerified(RoundSummary),
    /// The root finished a round.
    RoundCommitted(RoundDone),
    /// This node's local data is provably included in the round.
    ProofReady {
        round: RoundNumber,
        merkle_root: HashId,
        local_root: HashId,
        /// Proof of `local_root` against `merkle_root`.
        proof: Proof,
        /// Each submitted item with its proof against `merkle_root`.
        items: Vec<(HashId, Proof)>,
    },
    ViewChanged {
        view: ViewNumber,
    },
    ViewChangeRejected {
        view: ViewNumber,
        votes: u64,
        needed: u64,
    },
    GroupChanged(VoteOutcome),
}
