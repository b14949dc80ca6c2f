//! Per-host view table.
//!
//! A view is one parent/children assignment over the host set. Views are
//! numbered; a view change installs a new number without touching older
//! entries, so rounds still in flight under the old view keep resolving.
use std::collections::BTreeMap;

use crate::NodeName;

/// View identifier. Monotonically increasing across view changes.
pub type ViewNumber = u64;

/// One host's position in a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub number: ViewNumber,
    /// `None` when this host is the root of the view.
    pub parent: Option<NodeName>,
    /// Children in enumeration order (`put_down` payload order).
    pub children: Vec<NodeName>,
    /// Every host participating in the view (quorum denominator).
    pub host_list: Vec<NodeName>,
}

impl View {
    pub fn new(
        number: ViewNumber,
        parent: Option<NodeName>,
        children: Vec<NodeName>,
        host_list: Vec<NodeName>,
    ) -> Self {
        Self {
            number,
            parent,
            children,
            host_list,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// All views known to a host.
#[derive(Debug, Clone, Default)]
pub struct ViewTable {
    views: BTreeMap<ViewNumber, View>,
}

impl ViewTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a view.
    pub fn insert(&mut self, view: View) {
        self.views.insert(view.number, view);
    }

    pub fn get(&self, number: ViewNumber) -> Option<&View> {
        self.views.get(&number)
    }

    pub fn contains(&self, number: ViewNumber) -> bool {
        self.views.contains_key(&number)
    }

    /// Highest-numbered view installed.
    pub fn latest(&self) -> Option<&View> {
        self.views.values().next_back()
    }

    /// Add a child to a view. No-op if already present or the view is unknown.
    pub fn add_child(&mut self, number: ViewNumber, child: NodeName) -> bool {
        let Some(view) = self.views.get_mut(&number) else {
            return false;
        };
        if view.children.contains(&child) {
            return false;
        }
        view.children.push(child);
        true
    }

    /// Remove a child from a view. Returns whether it was present.
    pub fn remove_child(&mut self, number: ViewNumber, child: &NodeName) -> bool {
        let Some(view) = self.views.get_mut(&number) else {
            return false;
        };
        let before = view.children.len();
        view.children.retain(|c| c != child);
        view.children.len() != before
    }

    pub fn add_host(&mut self, number: ViewNumber, host: NodeName) -> bool {
        let Some(view) = self.views.get_mut(&number) else {
            return false;
        };
        if view.host_list.contains(&host) {
            return false;
        }
        view.host_list.push(host);
        true
    }

    pub fn remove_host(&mut self, number: ViewNumber, host: &NodeName) -> bool {
        let Some(view) = self.views.get_mut(&number) else {
            return false;
        };
        let before = view.host_list.len();
        view.host_list.retain(|h| h != host);
        view.host_list.len() != before
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
