//! Re-rooting the tree.
//!
//! The proposer becomes root of the new view with its peers as children;
//! every other host takes the sender of the proposal as its parent and
//! its remaining peers as children. Acceptances are counted on the way
//! back up and the proposer's decision is flooded down either way.
use std::time::Duration;

use super::{gather, quorum_threshold, Node};
use crate::error::CosiError;
use crate::events::CosiEvent;
use crate::message::{Payload, ViewAcceptedPayload, ViewChangePayload, ViewConfirmedPayload};
use crate::transport::Transport;
use crate::types::{NodeName, Phase, RoundNumber, ViewNumber};

impl<T: Transport> Node<T> {
    /// Propose `view` with this node as root.
    ///
    /// Succeeds once more than two thirds of the current host list have
    /// accepted; the new view is then current everywhere the confirmation
    /// reaches.
    pub async fn try_view_change(&self, view: ViewNumber) -> Result<(), CosiError> {
        let current = self.begin_view_change(view, None).await?;
        let t = &self.inner.transport;
        let hosts = t.host_list(current);
        if !t.has_view(view) {
            t.new_view(view, None, t.peers(), hosts.clone());
        }
        let children = t.children(view);
        tracing::info!(node = %self.inner.name, view, children = children.len(), "proposing view change");

        let msg = ViewChangePayload {
            view,
            round: self.last_seen_round().await,
            new_root: self.name(),
            depth: 1,
        };
        let wait = self.inner.config.view_change_wait(hosts.len(), 0);
        let votes = match self.collect_view_votes(view, &children, msg, wait).await {
            Ok(votes) => votes + 1,
            Err(e) => {
                self.finish_view_change(view, false).await;
                return Err(e);
            }
        };

        let needed = quorum_threshold(hosts.len());
        let accepted = votes > needed;
        self.broadcast_down(view, Payload::ViewConfirmed(ViewConfirmedPayload { view, accepted }))
            .await;
        self.finish_view_change(view, accepted).await;
        if accepted {
            return Ok(());
        }
        tracing::warn!(node = %self.inner.name, view, votes, needed, "view change rejected");
        self.emit(CosiEvent::ViewChangeRejected { view, votes, needed });
        Err(CosiError::ViewChangeRejected { view, votes, needed })
    }

    pub(super) async fn handle_view_change(&self, from: NodeName, msg: ViewChangePayload) -> Result<(), CosiError> {
        if self.failures().await.is_dead(Phase::ViewChange) {
            tracing::debug!(node = %self.inner.name, view = msg.view, "playing dead, ignoring view change");
            return Ok(());
        }
        let view = msg.view;
        let current = self.begin_view_change(view, Some(msg.round)).await?;
        self.inner.watch.touch();

        let t = &self.inner.transport;
        let hosts = t.host_list(current);
        if !t.has_view(view) {
            let children = t.peers().into_iter().filter(|p| *p != from).collect();
            t.new_view(view, Some(from.clone()), children, hosts.clone());
        }
        let children = t.children(view);
        let wait = self.inner.config.view_change_wait(hosts.len(), msg.depth);
        let forward = ViewChangePayload {
            depth: msg.depth + 1,
            ..msg
        };

        let votes = match self.collect_view_votes(view, &children, forward, wait).await {
            Ok(votes) => votes + 1,
            Err(e) => {
                self.finish_view_change(view, false).await;
                return Err(e);
            }
        };
        tracing::debug!(node = %self.inner.name, view, votes, "accepting view change");
        if let Err(e) = self
            .send_up(view, Payload::ViewAccepted(ViewAcceptedPayload { view, votes }))
            .await
        {
            self.finish_view_change(view, false).await;
            return Err(e);
        }
        self.expire_view_change(view, self.inner.config.view_change_confirm_wait(hosts.len()));
        Ok(())
    }

    /// Drop the pending change to `view` if no confirmation arrives within
    /// `wait`, so a proposer that dies before confirming cannot leave this
    /// node refusing rounds.
    fn expire_view_change(&self, view: ViewNumber, wait: Duration) {
        let node = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if node.inner.views.lock().await.changing != Some(view) {
                return;
            }
            tracing::warn!(node = %node.inner.name, view, "no confirmation after {wait:?}, abandoning view change");
            node.finish_view_change(view, false).await;
        });
    }

    pub(super) async fn handle_view_confirmed(&self, from: NodeName, msg: ViewConfirmedPayload) {
        if !self.inner.transport.is_parent(msg.view, &from) {
            tracing::warn!(node = %self.inner.name, view = msg.view, "view confirmation from non-parent {from}");
            return;
        }
        self.inner.watch.touch();
        self.broadcast_down(msg.view, Payload::ViewConfirmed(msg.clone()))
            .await;
        self.finish_view_change(msg.view, msg.accepted).await;
    }

    /// Mark `view` as being installed. Returns the current view.
    async fn begin_view_change(&self, view: ViewNumber, round: Option<RoundNumber>) -> Result<ViewNumber, CosiError> {
        let mut views = self.inner.views.lock().await;
        if view <= views.current {
            return Err(CosiError::PastView {
                view,
                current: views.current,
            });
        }
        if let Some(pending) = views.changing {
            if pending >= view {
                return Err(CosiError::ViewChanging { view: pending });
            }
        }
        views.changing = Some(view);
        let current = views.current;
        drop(views);

        if let Some(round) = round {
            self.inner.table.lock().await.ratchet(round);
        }
        Ok(current)
    }

    async fn finish_view_change(&self, view: ViewNumber, accepted: bool) {
        let mut views = self.inner.views.lock().await;
        if views.changing == Some(view) {
            views.changing = None;
        }
        if !accepted || view <= views.current {
            return;
        }
        views.current = view;
        drop(views);
        tracing::info!(node = %self.inner.name, view, "view installed");
        self.emit(CosiEvent::ViewChanged { view });
    }

    /// Send the proposal to `children` and sum their acceptances.
    /// Children that stay silent past `wait` count as zero.
    async fn collect_view_votes(
        &self,
        view: ViewNumber,
        children: &[NodeName],
        msg: ViewChangePayload,
        wait: Duration,
    ) -> Result<u64, CosiError> {
        if children.is_empty() {
            return Ok(0);
        }
        let mut rx = self
            .inner
            .table
            .lock()
            .await
            .open_view_votes(view, children.len())
            .ok_or(CosiError::ViewChanging { view })?;

        let payloads = vec![Payload::ViewChange(msg); children.len()];
        if let Err(e) = self.send_down(view, payloads).await {
            tracing::warn!(node = %self.inner.name, view, "view change to children: {e}");
        }
        let replies = gather(&mut rx, children, wait).await;
        self.inner.table.lock().await.close_view_votes(view);

        for child in children.iter().filter(|c| !replies.contains_key(*c)) {
            tracing::debug!(node = %self.inner.name, view, "no view acceptance from {child}");
        }
        Ok(replies.values().sum())
    }
}
