use crate::types::{NodeName, RoundNumber, ViewNumber};

/// Protocol-level errors for CoSi.
///
/// Wraps transport errors and adds round, view-change and wire variants.
/// Child timeouts are not errors: they become exception entries.
#[derive(Debug, thiserror::Error)]
pub enum CosiError {
    #[error("transport error: {0}")]
    Transport(#[from] cosi_transport::TransportError),

    #[error("round {round} is not newer than last seen round {last_seen}")]
    PastRound {
        round: RoundNumber,
        last_seen: RoundNumber,
    },

    #[error("too many outstanding rounds (limit {limit})")]
    TooManyRounds { limit: usize },

    #[error("view change to view {view} in progress")]
    ViewChanging { view: ViewNumber },

    #[error("view {view} is not newer than current view {current}")]
    PastView { view: ViewNumber, current: ViewNumber },

    #[error("unknown round {0}")]
    UnknownRound(RoundNumber),

    #[error("round {round} failed verification: {reason}")]
    VerificationFailed { round: RoundNumber, reason: String },

    #[error("round {round} abandoned: child {child} failed: {reason}")]
    ChildFailed {
        round: RoundNumber,
        child: NodeName,
        reason: String,
    },

    #[error("view change to view {view} rejected: {votes} votes, more than {needed} needed")]
    ViewChangeRejected {
        view: ViewNumber,
        votes: u64,
        needed: u64,
    },

    #[error("this node is not the root of view {view}")]
    NotRoot { view: ViewNumber },

    #[error("no public key known for {0}")]
    UnknownPeer(NodeName),

    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rmp_serde::encode::Error> for CosiError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CosiError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CosiError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CosiError::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_past_round() {
        let err = CosiError::PastRound {
            round: 3,
            last_seen: 7,
        };
        assert_eq!(
            err.to_string(),
            "round 3 is not newer than last seen round 7"
        );
    }

    #[test]
    fn test_display_view_change_rejected() {
        let err = CosiError::ViewChangeRejected {
            view: 1,
            votes: 2,
            needed: 2,
        };
        assert_eq!(
            err.to_string(),
            "view change to view 1 rejected: 2 votes, more than 2 needed"
        );
    }

    #[test]
    fn test_display_child_failed() {
        let err = CosiError::ChildFailed {
            round: 4,
            child: NodeName::from("B"),
            reason: "bad response".into(),
        };
        assert_eq!(
            err.to_string(),
            "round 4 abandoned: child B failed: bad response"
        );
    }

    #[test]
    fn test_from_transport_error() {
        let err: CosiError = cosi_transport::TransportError::NoParent { view: 0 }.into();
        assert!(matches!(err, CosiError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "transport error: view 0 has no parent (this host is root)"
        );
    }
}
