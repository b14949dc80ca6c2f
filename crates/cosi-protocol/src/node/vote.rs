//! Group-change votes: propose down, tally up, decide at the root.
use std::sync::atomic::Ordering;

use super::{gather, quorum_threshold, Node};
use crate::error::CosiError;
use crate::events::CosiEvent;
use crate::message::{GroupChangeKind, Payload, VoteOutcome, VoteRequest, VoteTally};
use crate::transport::Transport;
use crate::types::{NodeName, Phase, ViewNumber};

/// Decides how this node votes on a membership change.
pub trait VotePolicy: Send + Sync {
    fn vote(&self, kind: &GroupChangeKind) -> bool;
}

/// Votes yes on everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl VotePolicy for AcceptAll {
    fn vote(&self, _kind: &GroupChangeKind) -> bool {
        true
    }
}

impl<F> VotePolicy for F
where
    F: Fn(&GroupChangeKind) -> bool + Send + Sync,
{
    fn vote(&self, kind: &GroupChangeKind) -> bool {
        self(kind)
    }
}

impl<T: Transport> Node<T> {
    /// Put a membership change to the tree. Root only.
    ///
    /// The change is applied everywhere if more than two thirds of the
    /// host list accept it.
    pub async fn propose_group_change(&self, kind: GroupChangeKind) -> Result<VoteOutcome, CosiError> {
        let view = self.current_view().await;
        let t = &self.inner.transport;
        if !t.is_root(view) {
            return Err(CosiError::NotRoot { view });
        }
        self.ensure_stable().await?;

        let vote_id = self.inner.next_vote_id.fetch_add(1, Ordering::SeqCst) + 1;
        let tally = self.collect_tally(view, vote_id, &kind).await?;
        let hosts = t.host_list(view).len();
        let accepted = tally.accept > quorum_threshold(hosts);
        tracing::info!(
            node = %self.inner.name,
            vote_id,
            accept = tally.accept,
            reject = tally.reject,
            abstain = tally.abstain(hosts),
            accepted,
            "vote on {} decided",
            kind.subject()
        );

        let outcome = VoteOutcome {
            vote_id,
            kind,
            tally,
            accepted,
        };
        self.broadcast_down(view, Payload::VoteOutcome(outcome.clone())).await;
        self.apply_outcome(view, &outcome).await;
        Ok(outcome)
    }

    pub(super) async fn handle_vote_request(&self, view: ViewNumber, req: VoteRequest) -> Result<(), CosiError> {
        if self.failures().await.is_dead(Phase::Vote) {
            tracing::debug!(node = %self.inner.name, vote_id = req.vote_id, "playing dead, not voting");
            return Ok(());
        }
        let tally = self.collect_tally(view, req.vote_id, &req.kind).await?;
        self.send_up(view, Payload::VoteRequest(VoteRequest { tally, ..req }))
            .await
    }

    pub(super) async fn handle_vote_outcome(&self, view: ViewNumber, from: NodeName, outcome: VoteOutcome) {
        if !self.inner.transport.is_parent(view, &from) {
            tracing::warn!(node = %self.inner.name, vote_id = outcome.vote_id, "vote outcome from non-parent {from}");
            return;
        }
        self.broadcast_down(view, Payload::VoteOutcome(outcome.clone())).await;
        self.apply_outcome(view, &outcome).await;
    }

    /// This node's vote merged with its subtree's tallies.
    async fn collect_tally(&self, view: ViewNumber, vote_id: u64, kind: &GroupChangeKind) -> Result<VoteTally, CosiError> {
        let policy = self.inner.policy.lock().await.clone();
        let mut tally = VoteTally::single(policy.vote(kind));

        let t = &self.inner.transport;
        let children = t.children(view);
        if children.is_empty() {
            return Ok(tally);
        }
        let mut rx = self
            .inner
            .table
            .lock()
            .await
            .open_group_votes(vote_id, children.len())
            .ok_or_else(|| CosiError::InvalidEnvelope {
                reason: format!("vote {vote_id} is already open"),
            })?;

        let req = VoteRequest {
            vote_id,
            kind: kind.clone(),
            tally: VoteTally::default(),
        };
        if let Err(e) = self
            .send_down(view, vec![Payload::VoteRequest(req); children.len()])
            .await
        {
            tracing::warn!(node = %self.inner.name, vote_id, "vote request to children: {e}");
        }
        let timeout = self.inner.config.round_timeout(t.height(view));
        let replies = gather(&mut rx, &children, timeout).await;
        self.inner.table.lock().await.close_group_votes(vote_id);

        for sub in replies.values() {
            tally.merge(sub);
        }
        Ok(tally)
    }

    async fn apply_outcome(&self, view: ViewNumber, outcome: &VoteOutcome) {
        if outcome.accepted {
            let t = &self.inner.transport;
            match &outcome.kind {
                GroupChangeKind::AddPeer { name, parent, key } => {
                    t.add_host(view, name.clone());
                    self.inner.roster.lock().await.insert(name.clone(), *key);
                    if *parent == self.inner.name {
                        t.add_child(view, name.clone());
                    }
                }
                GroupChangeKind::RemovePeer { name } => {
                    t.remove_host(view, name);
                    t.remove_child(view, name);
                    self.inner.roster.lock().await.remove(name);
                }
            }
        }
        self.emit(CosiEvent::GroupChanged(outcome.clone()));
    }
}
