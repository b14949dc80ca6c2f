use serde::{Deserialize, Serialize};

use crate::error::CosiError;
use crate::merkle::{HashId, Proof};
use crate::suite::{Point, PublicKey, Secret};
use crate::types::{NodeName, RoundNumber, ViewNumber};

/// Message type: determines how the listener dispatches an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Announcement,
    Commitment,
    Challenge,
    Response,
    ViewChange,
    ViewAccepted,
    ViewConfirmed,
    Heartbeat,
    GroupChange,
    GroupChanged,
    Error,
}

// ── Signing payloads ────────────────────────────────────────────────

/// Root → leaves: open a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementPayload {
    pub round: RoundNumber,
    pub data: Vec<u8>,
}

/// Leaves → root: subtree commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentPayload {
    pub round: RoundNumber,
    /// Sender's own commitment `V`.
    pub v: Point,
    /// Subtree aggregate commitment `V̂`.
    pub v_hat: Point,
    /// Subtree aggregate public key `X̂`.
    pub x_hat: Point,
    /// Subtree Merkle root.
    pub merkle_root: HashId,
    /// Keys excluded anywhere in the subtree.
    pub exceptions: Vec<PublicKey>,
}

/// Root → leaves: the challenge plus the recipient's inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub round: RoundNumber,
    pub challenge: Secret,
    /// Global Merkle root.
    pub merkle_root: HashId,
    /// Proof of the recipient's subtree root against `merkle_root`.
    pub proof: Proof,
}

/// Leaves → root: subtree response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub round: RoundNumber,
    pub r_hat: Secret,
    pub exceptions: Vec<PublicKey>,
    /// Commitments of subtrees that committed but did not respond.
    pub exception_v_hat: Point,
    /// Keys of subtrees that committed but did not respond.
    pub exception_x_hat: Point,
}

/// Failure relayed upward in place of a Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub round: RoundNumber,
    pub reason: String,
}

// ── View-change payloads ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangePayload {
    /// Proposed view.
    pub view: ViewNumber,
    /// Proposer's last seen round; receivers ratchet to it.
    pub round: RoundNumber,
    pub new_root: NodeName,
    /// Hops from the new root (the root's direct children see 1).
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewAcceptedPayload {
    pub view: ViewNumber,
    /// Acceptances in the sender's subtree, sender included.
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfirmedPayload {
    pub view: ViewNumber,
    pub accepted: bool,
}

/// Root → leaves, every half heartbeat timeout while the root is alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub view: ViewNumber,
}

// ── Group-change payloads ───────────────────────────────────────────

/// A membership change put to a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupChangeKind {
    /// Attach `name` under `parent`.
    AddPeer {
        name: NodeName,
        parent: NodeName,
        key: PublicKey,
    },
    /// Detach `name` from the tree.
    RemovePeer { name: NodeName },
}

impl GroupChangeKind {
    /// Host the change is about.
    pub fn subject(&self) -> &NodeName {
        match self {
            GroupChangeKind::AddPeer { name, .. } | GroupChangeKind::RemovePeer { name } => name,
        }
    }
}

/// Vote counts for a subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub accept: u64,
    pub reject: u64,
}

impl VoteTally {
    /// Tally of a single vote.
    pub fn single(accept: bool) -> Self {
        if accept {
            Self {
                accept: 1,
                reject: 0,
            }
        } else {
            Self {
                accept: 0,
                reject: 1,
            }
        }
    }

    pub fn merge(&mut self, other: &VoteTally) {
        self.accept += other.accept;
        self.reject += other.reject;
    }

    /// Hosts that never voted.
    pub fn abstain(&self, hosts: usize) -> u64 {
        (hosts as u64).saturating_sub(self.accept + self.reject)
    }
}

/// Propose (down, zero tally) and Promise (up, subtree tally).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub vote_id: u64,
    pub kind: GroupChangeKind,
    pub tally: VoteTally,
}

/// Decision broadcast by the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub vote_id: u64,
    pub kind: GroupChangeKind,
    pub tally: VoteTally,
    pub accepted: bool,
}

// ── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Announcement(AnnouncementPayload),
    Commitment(CommitmentPayload),
    Challenge(ChallengePayload),
    Response(ResponsePayload),
    ViewChange(ViewChangePayload),
    ViewAccepted(ViewAcceptedPayload),
    ViewConfirmed(ViewConfirmedPayload),
    Heartbeat(HeartbeatPayload),
    VoteRequest(VoteRequest),
    VoteOutcome(VoteOutcome),
    Error(ErrorPayload),
}

impl Payload {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Payload::Announcement(_) => MessageType::Announcement,
            Payload::Commitment(_) => MessageType::Commitment,
            Payload::Challenge(_) => MessageType::Challenge,
            Payload::Response(_) => MessageType::Response,
            Payload::ViewChange(_) => MessageType::ViewChange,
            Payload::ViewAccepted(_) => MessageType::ViewAccepted,
            Payload::ViewConfirmed(_) => MessageType::ViewConfirmed,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::VoteRequest(_) => MessageType::GroupChange,
            Payload::VoteOutcome(_) => MessageType::GroupChanged,
            Payload::Error(_) => MessageType::Error,
        }
    }

    /// Round the payload belongs to, for round-scoped messages.
    pub fn round(&self) -> Option<RoundNumber> {
        match self {
            Payload::Announcement(p) => Some(p.round),
            Payload::Commitment(p) => Some(p.round),
            Payload::Challenge(p) => Some(p.round),
            Payload::Response(p) => Some(p.round),
            Payload::Error(p) => Some(p.round),
            _ => None,
        }
    }
}

/// Unit of communication between a node and its parent or children.
///
/// Serialized as MessagePack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub view: ViewNumber,
    pub from: NodeName,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(view: ViewNumber, from: NodeName, payload: Payload) -> Self {
        Self {
            msg_type: payload.msg_type(),
            view,
            from,
            payload,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CosiError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes and check the type tag.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CosiError> {
        let envelope: Envelope = rmp_serde::from_slice(data)?;
        let expected = envelope.payload.msg_type();
        if envelope.msg_type != expected {
            return Err(CosiError::InvalidEnvelope {
                reason: format!(
                    "type {:?} does not match payload {:?}",
                    envelope.msg_type, expected
                ),
            });
        }
        Ok(envelope)
    }
}
