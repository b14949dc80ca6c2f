//! In-process cluster: one [`Node`] per host over a [`LocalNetwork`].
//!
//! Used by the simulator and the integration suites. Keys are derived
//! from host names so runs are reproducible.
use std::collections::BTreeMap;

use cosi_transport::{LocalHost, LocalNetwork, LocalNetworkConfig};
use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::error::CosiError;
use crate::events::CosiEvent;
use crate::node::Node;
use crate::roster::Roster;
use crate::suite::Keypair;
use crate::types::NodeName;

pub struct LocalCluster {
    network: LocalNetwork,
    root: NodeName,
    roster: Roster,
    config: NodeConfig,
    nodes: BTreeMap<NodeName, Node<LocalHost>>,
    events: BTreeMap<NodeName, mpsc::Receiver<CosiEvent>>,
}

impl LocalCluster {
    /// Build the tree `edges` (parent, child) rooted at `root` as view 0
    /// and start every node.
    pub fn build(
        root: &str,
        edges: &[(&str, &str)],
        config: NodeConfig,
        net_config: LocalNetworkConfig,
    ) -> Result<Self, CosiError> {
        let network = LocalNetwork::new(net_config);
        let root = NodeName::from(root);
        let edges: Vec<(NodeName, NodeName)> = edges
            .iter()
            .map(|(p, c)| (NodeName::from(*p), NodeName::from(*c)))
            .collect();

        let mut names = vec![root.clone()];
        for (p, c) in &edges {
            for name in [p, c] {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        let roster: Roster = names
            .iter()
            .map(|n| (n.clone(), Keypair::from_seed(n.as_bytes()).public()))
            .collect();

        let mut hosts = Vec::with_capacity(names.len());
        for name in &names {
            hosts.push((name.clone(), network.add_host(name.clone())));
        }
        network.install_tree(0, &root, &edges)?;

        let mut cluster = Self {
            network,
            root,
            roster,
            config,
            nodes: BTreeMap::new(),
            events: BTreeMap::new(),
        };
        for (name, (host, inbound)) in hosts {
            cluster.start_node(name, host, inbound);
        }
        tracing::debug!(hosts = cluster.nodes.len(), "local cluster up");
        Ok(cluster)
    }

    fn start_node(&mut self, name: NodeName, host: LocalHost, inbound: mpsc::Receiver<cosi_transport::Incoming>) {
        let keypair = Keypair::from_seed(name.as_bytes());
        let (node, events) = Node::new(host, keypair, self.roster.clone(), self.config.clone());
        node.start(inbound);
        self.nodes.insert(name.clone(), node);
        self.events.insert(name, events);
    }

    /// Register a new host linked to `parent` and start its node as a
    /// leaf under `parent` in the parent's current view. The rest of the
    /// tree learns of it through a group-change vote.
    pub async fn join(&mut self, name: &str, parent: &str) -> Result<&Node<LocalHost>, CosiError> {
        let name = NodeName::from(name);
        let parent = NodeName::from(parent);
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| CosiError::UnknownPeer(parent.clone()))?;
        let view = parent_node.current_view().await;
        let mut host_list = parent_node.transport().host_list(view);
        host_list.push(name.clone());

        let (host, inbound) = self.network.add_host(name.clone());
        self.network.connect(&parent, &name)?;
        host.new_view(view, Some(parent), Vec::new(), host_list);

        self.roster
            .insert(name.clone(), Keypair::from_seed(name.as_bytes()).public());
        self.start_node(name.clone(), host, inbound);
        let node = self.nodes.get(&name).ok_or(CosiError::UnknownPeer(name))?;
        node.adopt_view(view).await;
        Ok(node)
    }

    pub fn node(&self, name: &str) -> Option<&Node<LocalHost>> {
        self.nodes.get(&NodeName::from(name))
    }

    /// Root of view 0.
    pub fn root(&self) -> &Node<LocalHost> {
        &self.nodes[&self.root]
    }

    pub fn names(&self) -> Vec<NodeName> {
        self.nodes.keys().cloned().collect()
    }

    /// Take a node's event receiver. `None` once taken.
    pub fn take_events(&mut self, name: &str) -> Option<mpsc::Receiver<CosiEvent>> {
        self.events.remove(&NodeName::from(name))
    }

    /// Keys of every host known at build time (plus joins).
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }
}
