//! CoSi transport layer.
//!
//! Owns the tree-shaped view table (who is my parent, who are my children
//! in view N) and an in-process message fabric used by the simulator and
//! the test suites.
//!
//! # Quick start
//!
//! ```rust
//! use cosi_transport::{LocalNetwork, LocalNetworkConfig, NodeName};
//!
//! # async fn example() -> Result<(), cosi_transport::TransportError> {
//! let net = LocalNetwork::new(LocalNetworkConfig::new());
//! let (root, _root_rx) = net.add_host("root".into());
//! let (leaf, mut leaf_rx) = net.add_host("leaf".into());
//!
//! let root_name: NodeName = "root".into();
//! net.install_tree(0, &root_name, &[("root".into(), "leaf".into())])?;
//!
//! root.put_down(0, vec![b"hello".to_vec()]).await?;
//! let (from, data) = leaf_rx.recv().await.unwrap();
//! assert_eq!(from, root_name);
//! assert_eq!(data, b"hello");
//! # let _ = leaf;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod network;
mod view;

pub use config::LocalNetworkConfig;
pub use error::TransportError;
pub use network::{Incoming, LocalHost, LocalNetwork};
pub use view::{View, ViewNumber, ViewTable};

use std::fmt;
use std::str::FromStr;

/// Identity of a host in the tree.
///
/// Names are opaque strings ("root", "A", "10.0.0.4:2000"). Ordering is
/// lexicographic, which the view-change election relies on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Create a name from anything string-like.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the name (used to seed per-node hash streams).
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeName({})", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for NodeName {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TransportError::InvalidNodeName(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank_names() {
        assert!("   ".parse::<NodeName>().is_err());
        assert_eq!("  A ".parse::<NodeName>().unwrap(), NodeName::from("A"));
    }

    #[test]
    fn names_order_lexicographically() {
        let mut names: Vec<NodeName> = vec!["c".into(), "a".into(), "b".into()];
        names.sort();
        assert_eq!(names, vec!["a".into(), "b".into(), "c".into()] as Vec<NodeName>);
    }

    #[test]
    fn debug_and_display() {
        let name = NodeName::from("root");
        assert_eq!(name.to_string(), "root");
        assert_eq!(format!("{name:?}"), "NodeName(root)");
    }
}
