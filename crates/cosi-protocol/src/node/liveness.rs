//! Root liveness.
//!
//! The root of the current view sends a heartbeat down every half
//! timeout and every node forwards it to its children. When a node hears
//! nothing from its parent for a full timeout, the designated host for
//! the next view proposes a view change.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Node;
use crate::message::{HeartbeatPayload, Payload};
use crate::transport::Transport;
use crate::types::{NodeName, ViewNumber};

/// Time of the last message heard from above.
pub(crate) struct RootWatch {
    base: Instant,
    last_heard_ms: AtomicU64,
}

impl RootWatch {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            last_heard_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_heard_ms.store(now, Ordering::Relaxed);
    }

    pub fn silent_for(&self) -> Duration {
        let now = self.base.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_heard_ms.load(Ordering::Relaxed)))
    }
}

/// Host expected to propose `view`: index `view mod n` into the sorted,
/// deduplicated host list.
pub fn designated_root(hosts: &[NodeName], view: ViewNumber) -> Option<NodeName> {
    let mut sorted = hosts.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.is_empty() {
        return None;
    }
    let idx = (view % sorted.len() as u64) as usize;
    sorted.get(idx).cloned()
}

impl<T: Transport> Node<T> {
    /// Heartbeat from the parent of the current view: reset the silence
    /// timer and pass it on. Stale views and non-parents are ignored.
    pub(super) async fn handle_heartbeat(&self, from: NodeName, msg: HeartbeatPayload) {
        let view = self.current_view().await;
        if msg.view != view || !self.inner.transport.is_parent(view, &from) {
            tracing::debug!(node = %self.inner.name, view = msg.view, "ignoring heartbeat from {from}");
            return;
        }
        self.inner.watch.touch();
        self.broadcast_down(view, Payload::Heartbeat(msg)).await;
    }
}

/// Tick every half timeout. The root sends a heartbeat; everyone else
/// checks parent silence. Each silent tick targets the next view up, so a
/// designated host that is itself dead gets skipped.
pub(super) fn spawn_watch<T: Transport>(node: &Node<T>, timeout: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&node.inner);
    node.inner.watch.touch();
    let period = (timeout / 2).max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.tick().await;
        let mut attempt: u64 = 0;
        loop {
            tick.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let node = Node { inner };
            let view = node.current_view().await;
            let t = &node.inner.transport;
            if t.is_root(view) {
                attempt = 0;
                node.broadcast_down(view, Payload::Heartbeat(HeartbeatPayload { view }))
                    .await;
                continue;
            }
            if node.inner.watch.silent_for() < timeout {
                attempt = 0;
                continue;
            }
            if node.is_changing_view().await {
                continue;
            }

            let target = view + 1 + attempt;
            attempt += 1;
            let hosts = t.host_list(view);
            if designated_root(&hosts, target).as_ref() != Some(&node.inner.name) {
                continue;
            }
            tracing::info!(
                node = %node.inner.name,
                view,
                target,
                "parent silent for {:?}, proposing view change",
                node.inner.watch.silent_for()
            );
            match node.try_view_change(target).await {
                Ok(()) => {
                    node.inner.watch.touch();
                    attempt = 0;
                }
                Err(e) => tracing::warn!(node = %node.inner.name, target, "view change failed: {e}"),
            }
        }
    })
}
