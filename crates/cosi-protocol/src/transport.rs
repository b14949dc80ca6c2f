use cosi_transport::{LocalHost, TransportError};

use crate::types::{NodeName, ViewNumber};

/// Tree-shaped transport consumed by the node engine.
///
/// In production: impl by [`LocalHost`] (in-process fabric).
/// In tests: impl by `MockTransport` (records sends).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> NodeName;

    /// Children in enumeration order; `put_down` payloads follow it.
    fn children(&self, view: ViewNumber) -> Vec<NodeName>;

    fn parent(&self, view: ViewNumber) -> Option<NodeName>;

    fn is_root(&self, view: ViewNumber) -> bool;

    fn is_parent(&self, view: ViewNumber, peer: &NodeName) -> bool {
        self.parent(view).as_ref() == Some(peer)
    }

    fn is_child(&self, view: ViewNumber, peer: &NodeName) -> bool {
        self.children(view).contains(peer)
    }

    /// Hosts with an established link.
    fn peers(&self) -> Vec<NodeName>;

    fn host_list(&self, view: ViewNumber) -> Vec<NodeName>;

    /// Height of this node's subtree (a leaf is 0).
    fn height(&self, view: ViewNumber) -> usize;

    fn has_view(&self, view: ViewNumber) -> bool;

    fn new_view(
        &self,
        view: ViewNumber,
        parent: Option<NodeName>,
        children: Vec<NodeName>,
        host_list: Vec<NodeName>,
    );

    fn add_child(&self, view: ViewNumber, child: NodeName) -> bool;

    fn remove_child(&self, view: ViewNumber, child: &NodeName) -> bool;

    fn add_host(&self, view: ViewNumber, host: NodeName) -> bool;

    fn remove_host(&self, view: ViewNumber, host: &NodeName) -> bool;

    /// Deliver one frame to the parent.
    async fn put_up(&self, view: ViewNumber, data: Vec<u8>) -> Result<(), TransportError>;

    /// Deliver one frame per child, in child order.
    async fn put_down(&self, view: ViewNumber, data: Vec<Vec<u8>>) -> Result<(), TransportError>;
}

// ── Impl for LocalHost ──────────────────────────────────────────────

#[async_trait::async_trait]
impl Transport for LocalHost {
    fn name(&self) -> NodeName {
        LocalHost::name(self)
    }

    fn children(&self, view: ViewNumber) -> Vec<NodeName> {
        LocalHost::children(self, view)
    }

    fn parent(&self, view: ViewNumber) -> Option<NodeName> {
        LocalHost::parent(self, view)
    }

    fn is_root(&self, view: ViewNumber) -> bool {
        LocalHost::is_root(self, view)
    }

    fn peers(&self) -> Vec<NodeName> {
        LocalHost::peers(self)
    }

    fn host_list(&self, view: ViewNumber) -> Vec<NodeName> {
        LocalHost::host_list(self, view)
    }

    fn height(&self, view: ViewNumber) -> usize {
        LocalHost::height(self, view)
    }

    fn has_view(&self, view: ViewNumber) -> bool {
        LocalHost::has_view(self, view)
    }

    fn new_view(
        &self,
        view: ViewNumber,
        parent: Option<NodeName>,
        children: Vec<NodeName>,
        host_list: Vec<NodeName>,
    ) {
        LocalHost::new_view(self, view, parent, children, host_list)
    }

    fn add_child(&self, view: ViewNumber, child: NodeName) -> bool {
        LocalHost::add_child(self, view, child)
    }

    fn remove_child(&self, view: ViewNumber, child: &NodeName) -> bool {
        LocalHost::remove_child(self, view, child)
    }

    fn add_host(&self, view: ViewNumber, host: NodeName) -> bool {
        LocalHost::add_host(self, view, host)
    }

    fn remove_host(&self, view: ViewNumber, host: &NodeName) -> bool {
        LocalHost::remove_host(self, view, host)
    }

    async fn put_up(&self, view: ViewNumber, data: Vec<u8>) -> Result<(), TransportError> {
        LocalHost::put_up(self, view, data).await
    }

    async fn put_down(&self, view: ViewNumber, data: Vec<Vec<u8>>) -> Result<(), TransportError> {
        LocalHost::put_down(self, view, data).await
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────
