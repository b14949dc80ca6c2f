use crate::{NodeName, ViewNumber};

/// Errors returned by the CoSi transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {peer} is closed")]
    ConnectionClosed { peer: NodeName },

    #[error("no connection established to {peer}")]
    NotEstablished { peer: NodeName },

    #[error("send to {peer} timed out")]
    Timeout { peer: NodeName },

    #[error("unknown view {0}")]
    UnknownView(ViewNumber),

    #[error("view {view} has no parent (this host is root)")]
    NoParent { view: ViewNumber },

    #[error("put_down expects {expected} payloads (one per child), got {got}")]
    PayloadCountMismatch { expected: usize, got: usize },

    #[error("unknown host: {0}")]
    UnknownHost(NodeName),

    #[error("invalid node name: {0:?}")]
    InvalidNodeName(String),

    #[error("host {0} is shut down")]
    Shutdown(NodeName),
}
