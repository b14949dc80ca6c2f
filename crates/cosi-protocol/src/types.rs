use serde::{Deserialize, Serialize};

pub use cosi_transport::{NodeName, ViewNumber};

/// Round identifier. Strictly increasing at the root.
pub type RoundNumber = u64;

/// Protocol phases, used for failure injection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Announce,
    Commit,
    Challenge,
    Response,
    ViewChange,
    Vote,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Announce => "announce",
            Phase::Commit => "commit",
            Phase::Challenge => "challenge",
            Phase::Response => "response",
            Phase::ViewChange => "view-change",
            Phase::Vote => "vote",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "announce" => Ok(Phase::Announce),
            "commit" => Ok(Phase::Commit),
            "challenge" => Ok(Phase::Challenge),
            "response" | "respond" => Ok(Phase::Response),
            "view-change" | "viewchange" => Ok(Phase::ViewChange),
            "vote" => Ok(Phase::Vote),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}
