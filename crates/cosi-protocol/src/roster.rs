/// Roster: public keys of every host the node may have to except.
///
/// A child that misses a phase is excepted by public key, so each node
/// needs the keys of at least its children. Accepted group changes add
/// and remove entries at runtime.
use std::collections::BTreeMap;

use crate::suite::{Accumulator, Point, PublicKey};
use crate::types::NodeName;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    keys: BTreeMap<NodeName, PublicKey>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a host's key. Returns the previous key, if any.
    pub fn insert(&mut self, name: NodeName, key: PublicKey) -> Option<PublicKey> {
        self.keys.insert(name, key)
    }

    pub fn remove(&mut self, name: &NodeName) -> Option<PublicKey> {
        self.keys.remove(name)
    }

    pub fn get(&self, name: &NodeName) -> Option<PublicKey> {
        self.keys.get(name).copied()
    }

    pub fn contains(&self, name: &NodeName) -> bool {
        self.keys.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &NodeName> {
        self.keys.keys()
    }

    /// Sum of the keys of `names`. Unknown names are skipped.
    pub fn aggregate<'a>(&self, names: impl IntoIterator<Item = &'a NodeName>) -> Point {
        let mut acc = Accumulator::new();
        for name in names {
            if let Some(key) = self.keys.get(name) {
                acc.add(&key.point());
            }
        }
        acc.value()
    }
}

impl FromIterator<(NodeName, PublicKey)> for Roster {
    fn from_iter<I: IntoIterator<Item = (NodeName, PublicKey)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
