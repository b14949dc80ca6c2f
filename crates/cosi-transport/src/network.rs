//! In-process message fabric.
//!
//! Every host owns a bounded inbox; each established link is a clone of
//! the peer's inbox sender, tagged with the sender's name on delivery.
//! Topology (views) is stored per host but reachable through the shared
//! registry so the fabric can answer subtree-height queries.
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use crate::config::LocalNetworkConfig;
use crate::view::{View, ViewNumber, ViewTable};
use crate::{NodeName, TransportError};

/// One inbound frame: sender identity and raw bytes.
pub type Incoming = (NodeName, Vec<u8>);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct HostShared {
    name: NodeName,
    inbox: mpsc::Sender<Incoming>,
    peers: RwLock<BTreeSet<NodeName>>,
    views: RwLock<ViewTable>,
    closed: AtomicBool,
}

#[derive(Default)]
struct Registry {
    hosts: HashMap<NodeName, Arc<HostShared>>,
}

/// A set of hosts sharing one process.
///
/// Cheap to clone; all clones refer to the same registry.
#[derive(Clone)]
pub struct LocalNetwork {
    registry: Arc<RwLock<Registry>>,
    config: LocalNetworkConfig,
}

impl LocalNetwork {
    pub fn new(config: LocalNetworkConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            config,
        }
    }

    /// Register a host and return its handle plus inbox receiver.
    ///
    /// Re-adding an existing name replaces it (a restarted host comes back
    /// with no peers and no views).
    pub fn add_host(&self, name: NodeName) -> (LocalHost, mpsc::Receiver<Incoming>) {
        let (tx, rx) = mpsc::channel(self.config.inbox_capacity);
        let shared = Arc::new(HostShared {
            name: name.clone(),
            inbox: tx,
            peers: RwLock::new(BTreeSet::new()),
            views: RwLock::new(ViewTable::new()),
            closed: AtomicBool::new(false),
        });
        write(&self.registry).hosts.insert(name, shared.clone());
        let host = LocalHost {
            shared,
            network: self.clone(),
        };
        (host, rx)
    }

    /// Establish a bidirectional link between two registered hosts.
    pub fn connect(&self, a: &NodeName, b: &NodeName) -> Result<(), TransportError> {
        let host_a = self
            .lookup(a)
            .ok_or_else(|| TransportError::UnknownHost(a.clone()))?;
        let host_b = self
            .lookup(b)
            .ok_or_else(|| TransportError::UnknownHost(b.clone()))?;
        write(&host_a.peers).insert(b.clone());
        write(&host_b.peers).insert(a.clone());
        Ok(())
    }

    /// Tear down the link between two hosts (both directions).
    pub fn disconnect(&self, a: &NodeName, b: &NodeName) {
        if let Some(host) = self.lookup(a) {
            write(&host.peers).remove(b);
        }
        if let Some(host) = self.lookup(b) {
            write(&host.peers).remove(a);
        }
    }

    /// Mark a host as crashed: its sends fail and sends to it fail.
    pub fn close(&self, name: &NodeName) {
        if let Some(host) = self.lookup(name) {
            host.closed.store(true, Ordering::SeqCst);
            tracing::debug!("local network: host {name} closed");
        }
    }

    /// Connect `edges` (parent, child) and install `view` on every host
    /// that appears in them. The host list is the root followed by each
    /// child in edge order.
    pub fn install_tree(
        &self,
        view: ViewNumber,
        root: &NodeName,
        edges: &[(NodeName, NodeName)],
    ) -> Result<(), TransportError> {
        let mut host_list = vec![root.clone()];
        for (_, child) in edges {
            if !host_list.contains(child) {
                host_list.push(child.clone());
            }
        }

        for (parent, child) in edges {
            self.connect(parent, child)?;
        }

        for name in &host_list {
            let host = self
                .lookup(name)
                .ok_or_else(|| TransportError::UnknownHost(name.clone()))?;
            let parent = edges
                .iter()
                .find(|(_, c)| c == name)
                .map(|(p, _)| p.clone());
            let children = edges
                .iter()
                .filter(|(p, _)| p == name)
                .map(|(_, c)| c.clone())
                .collect();
            write(&host.views).insert(View::new(view, parent, children, host_list.clone()));
        }
        Ok(())
    }

    /// Names of every registered host, sorted.
    pub fn host_names(&self) -> Vec<NodeName> {
        let mut names: Vec<NodeName> = read(&self.registry).hosts.keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &NodeName) -> Option<Arc<HostShared>> {
        read(&self.registry).hosts.get(name).cloned()
    }

    /// Height of the subtree rooted at `name` in `view` (a leaf is 0).
    fn height_of(&self, name: &NodeName, view: ViewNumber, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }
        let Some(host) = self.lookup(name) else {
            return 0;
        };
        let children = read(&host.views)
            .get(view)
            .map(|v| v.children.clone())
            .unwrap_or_default();
        children
            .iter()
            .map(|child| 1 + self.height_of(child, view, budget - 1))
            .max()
            .unwrap_or(0)
    }

    fn host_count(&self) -> usize {
        read(&self.registry).hosts.len()
    }
}

/// One host's handle onto a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalHost {
    shared: Arc<HostShared>,
    network: LocalNetwork,
}

impl LocalHost {
    pub fn name(&self) -> NodeName {
        self.shared.name.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Peers with an established link, sorted.
    pub fn peers(&self) -> Vec<NodeName> {
        read(&self.shared.peers).iter().cloned().collect()
    }

    pub fn view(&self, view: ViewNumber) -> Option<View> {
        read(&self.shared.views).get(view).cloned()
    }

    pub fn has_view(&self, view: ViewNumber) -> bool {
        read(&self.shared.views).contains(view)
    }

    pub fn latest_view(&self) -> Option<ViewNumber> {
        read(&self.shared.views).latest().map(|v| v.number)
    }

    pub fn children(&self, view: ViewNumber) -> Vec<NodeName> {
        self.view(view).map(|v| v.children).unwrap_or_default()
    }

    pub fn parent(&self, view: ViewNumber) -> Option<NodeName> {
        self.view(view).and_then(|v| v.parent)
    }

    /// Root of `view`. An unknown view is never reported as root.
    pub fn is_root(&self, view: ViewNumber) -> bool {
        self.view(view).map(|v| v.is_root()).unwrap_or(false)
    }

    pub fn host_list(&self, view: ViewNumber) -> Vec<NodeName> {
        self.view(view).map(|v| v.host_list).unwrap_or_default()
    }

    /// Height of this host's subtree in `view`.
    pub fn height(&self, view: ViewNumber) -> usize {
        let budget = self.network.host_count();
        self.network.height_of(&self.shared.name, view, budget)
    }

    pub fn new_view(
        &self,
        view: ViewNumber,
        parent: Option<NodeName>,
        children: Vec<NodeName>,
        host_list: Vec<NodeName>,
    ) {
        write(&self.shared.views).insert(View::new(view, parent, children, host_list));
    }

    pub fn add_child(&self, view: ViewNumber, child: NodeName) -> bool {
        write(&self.shared.views).add_child(view, child)
    }

    pub fn remove_child(&self, view: ViewNumber, child: &NodeName) -> bool {
        write(&self.shared.views).remove_child(view, child)
    }

    pub fn add_host(&self, view: ViewNumber, host: NodeName) -> bool {
        write(&self.shared.views).add_host(view, host)
    }

    pub fn remove_host(&self, view: ViewNumber, host: &NodeName) -> bool {
        write(&self.shared.views).remove_host(view, host)
    }

    /// Deliver raw bytes to a connected peer.
    pub async fn send_to(&self, peer: &NodeName, data: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Shutdown(self.name()));
        }
        if !read(&self.shared.peers).contains(peer) {
            return Err(TransportError::NotEstablished { peer: peer.clone() });
        }
        let target = self
            .network
            .lookup(peer)
            .ok_or_else(|| TransportError::NotEstablished { peer: peer.clone() })?;
        if target.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed { peer: peer.clone() });
        }

        let inbox = target.inbox.clone();
        let frame = (self.name(), data);
        match tokio::time::timeout(self.network.config.send_timeout, inbox.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed { peer: peer.clone() }),
            Err(_) => Err(TransportError::Timeout { peer: peer.clone() }),
        }
    }

    /// Deliver one frame to the parent in `view`.
    pub async fn put_up(&self, view: ViewNumber, data: Vec<u8>) -> Result<(), TransportError> {
        let current = self.view(view).ok_or(TransportError::UnknownView(view))?;
        let parent = current.parent.ok_or(TransportError::NoParent { view })?;
        self.send_to(&parent, data).await
    }

    /// Deliver one frame per child in `view`, in child-enumeration order.
    ///
    /// Every child is attempted; the first failure is returned.
    pub async fn put_down(&self, view: ViewNumber, data: Vec<Vec<u8>>) -> Result<(), TransportError> {
        let current = self.view(view).ok_or(TransportError::UnknownView(view))?;
        if data.len() != current.children.len() {
            return Err(TransportError::PayloadCountMismatch {
                expected: current.children.len(),
                got: data.len(),
            });
        }

        let mut first_err = None;
        for (child, frame) in current.children.iter().zip(data) {
            if let Err(e) = self.send_to(child, frame).await {
                tracing::debug!("put_down to {child} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NodeName {
        NodeName::from(s)
    }

    fn edges(list: &[(&str, &str)]) -> Vec<(NodeName, NodeName)> {
        list.iter().map(|(p, c)| (name(p), name(c))).collect()
    }

    #[test]
    fn install_tree_assigns_parents_and_children() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (root, _r) = net.add_host(name("root"));
        let (a, _a) = net.add_host(name("A"));
        let (b, _b) = net.add_host(name("B"));
        let (c, _c) = net.add_host(name("C"));

        net.install_tree(0, &name("root"), &edges(&[("root", "A"), ("A", "B"), ("A", "C")]))
            .unwrap();

        assert!(root.is_root(0));
        assert_eq!(root.children(0), vec![name("A")]);
        assert_eq!(a.parent(0), Some(name("root")));
        assert_eq!(a.children(0), vec![name("B"), name("C")]);
        assert!(b.children(0).is_empty());
        assert_eq!(c.host_list(0).len(), 4);
        assert_eq!(root.height(0), 2);
        assert_eq!(a.height(0), 1);
        assert_eq!(b.height(0), 0);
    }

    #[test]
    fn unknown_view_is_not_root() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (host, _rx) = net.add_host(name("solo"));
        assert!(!host.is_root(5));
        assert!(host.children(5).is_empty());
    }

    #[tokio::test]
    async fn put_down_rejects_payload_count_mismatch() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (root, _r) = net.add_host(name("root"));
        let (_a, _a_rx) = net.add_host(name("A"));
        net.install_tree(0, &name("root"), &edges(&[("root", "A")])).unwrap();

        let err = root.put_down(0, vec![]).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::PayloadCountMismatch {
                expected: 1,
                got: 0
            }
        );
    }

    #[tokio::test]
    async fn put_up_from_root_fails() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (root, _r) = net.add_host(name("root"));
        root.new_view(0, None, vec![], vec![name("root")]);
        let err = root.put_up(0, vec![1]).await.unwrap_err();
        assert_eq!(err, TransportError::NoParent { view: 0 });
    }

    #[tokio::test]
    async fn send_to_unconnected_peer_fails() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (a, _a) = net.add_host(name("A"));
        let (_b, _b_rx) = net.add_host(name("B"));
        let err = a.send_to(&name("B"), vec![]).await.unwrap_err();
        assert_eq!(err, TransportError::NotEstablished { peer: name("B") });
    }

    #[tokio::test]
    async fn send_to_closed_peer_fails() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (a, _a) = net.add_host(name("A"));
        let (_b, _b_rx) = net.add_host(name("B"));
        net.connect(&name("A"), &name("B")).unwrap();
        net.close(&name("B"));
        let err = a.send_to(&name("B"), vec![]).await.unwrap_err();
        assert_eq!(err, TransportError::ConnectionClosed { peer: name("B") });
    }

    #[tokio::test]
    async fn dropped_receiver_reports_connection_closed() {
        let net = LocalNetwork::new(LocalNetworkConfig::new());
        let (a, _a) = net.add_host(name("A"));
        let (_b, b_rx) = net.add_host(name("B"));
        net.connect(&name("A"), &name("B")).unwrap();
        drop(b_rx);
        let err = a.send_to(&name("B"), vec![9]).await.unwrap_err();
        assert_eq!(err, TransportError::ConnectionClosed { peer: name("B") });
    }

    #[tokio::test(start_paused = true)]
    async fn full_inbox_times_out_instead_of_blocking() {
        let net = LocalNetwork::new(
            LocalNetworkConfig::new()
                .inbox_capacity(1)
                .send_timeout(std::time::Duration::from_millis(50)),
        );
        let (a, _a) = net.add_host(name("A"));
        let (_b, _b_rx) = net.add_host(name("B"));
        net.connect(&name("A"), &name("B")).unwrap();

        a.send_to(&name("B"), vec![1]).await.unwrap();
        let err = a.send_to(&name("B"), vec![2]).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout { peer: name("B") });
    }
}
