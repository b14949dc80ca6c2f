//! Announce → Commit → Challenge → Respond.
//!
//! Each round is driven by a single task from Announce to Respond; the
//! round's mutex is held for the whole of a phase, including fan-in waits.
use curve25519_dalek::scalar::Scalar;

use super::table::RoundHandle;
use super::{gather, Node};
use crate::error::CosiError;
use crate::events::{CosiEvent, RoundDone, RoundSummary};
use crate::merkle::Proof;
use crate::message::{AnnouncementPayload, ChallengePayload, ErrorPayload, Payload};
use crate::round::{ChildReply, LeafSource, RoundState};
use crate::signature::CollectiveSignature;
use crate::suite;
use crate::transport::Transport;
use crate::types::{Phase, RoundNumber, ViewNumber};

impl<T: Transport> Node<T> {
    /// Open the next round at the root and drive it to completion.
    ///
    /// Returns the round number once Respond has verified. Concurrent
    /// calls get distinct round numbers.
    pub async fn start_round(&self, data: Vec<u8>) -> Result<RoundNumber, CosiError> {
        let view = self.current_view().await;
        let t = &self.inner.transport;
        if !t.is_root(view) {
            return Err(CosiError::NotRoot { view });
        }
        self.ensure_stable().await?;

        let fan_in = t.children(view).len();
        let (round, handle) = {
            let mut table = self.inner.table.lock().await;
            let round = table.next_round();
            let handle = table.open(round, view, data.clone(), true, fan_in)?;
            (round, handle)
        };
        tracing::info!(node = %self.inner.name, round, view, "starting round");
        self.run_announced(view, AnnouncementPayload { round, data }, handle)
            .await?;
        Ok(round)
    }

    /// Announce entry point: the root with an explicit round number, or a
    /// child on receipt from its parent.
    pub async fn announce(&self, view: ViewNumber, msg: AnnouncementPayload) -> Result<(), CosiError> {
        self.ensure_stable().await?;
        let failures = self.failures().await;
        if failures.is_dead(Phase::Announce) || failures.is_dead(Phase::Commit) {
            tracing::debug!(node = %self.inner.name, round = msg.round, "playing dead, ignoring announcement");
            return Ok(());
        }

        let t = &self.inner.transport;
        let is_root = t.is_root(view);
        let fan_in = t.children(view).len();
        let handle = self
            .inner
            .table
            .lock()
            .await
            .open(msg.round, view, msg.data.clone(), is_root, fan_in)?;
        self.run_announced(view, msg, handle).await
    }

    async fn run_announced(
        &self,
        view: ViewNumber,
        msg: AnnouncementPayload,
        handle: RoundHandle,
    ) -> Result<(), CosiError> {
        let round = msg.round;
        let n = self.inner.transport.children(view).len();
        if n > 0 {
            let payloads = vec![Payload::Announcement(msg); n];
            if let Err(e) = self.send_down(view, payloads).await {
                tracing::warn!(node = %self.inner.name, round, "announce to children: {e}");
            }
        }
        self.commit(view, round, handle).await
    }

    // ── Commit ──────────────────────────────────────────────────────

    async fn commit(&self, view: ViewNumber, round_no: RoundNumber, handle: RoundHandle) -> Result<(), CosiError> {
        let t = &self.inner.transport;
        let children = t.children(view);
        let timeout = self.inner.config.round_timeout(t.height(view));
        let items = std::mem::take(&mut *self.inner.pending.lock().await);
        let v = self.inner.nonces.lock().await.next(round_no);

        let mut round = handle.lock().await;
        round.begin_commit(v, &self.public_key());
        let mut replies = match round.commit_rx.take() {
            Some(mut rx) => gather(&mut rx, &children, timeout).await,
            None => Default::default(),
        };

        let roster = self.inner.roster.lock().await;
        let mut child_roots = Vec::with_capacity(children.len());
        for child in &children {
            match replies.remove(child) {
                Some(msg) => {
                    round.fold_commitment(child, &msg);
                    child_roots.push((child.clone(), msg.merkle_root));
                }
                None => {
                    tracing::warn!(node = %self.inner.name, round = round_no, "no commitment from {child}, excepting");
                    match roster.get(child) {
                        Some(key) => {
                            round.add_exception(key);
                        }
                        None => {
                            tracing::warn!(node = %self.inner.name, "{}", CosiError::UnknownPeer(child.clone()));
                        }
                    }
                }
            }
        }
        drop(roster);

        round.build_merkle(child_roots, &items);
        tracing::debug!(
            node = %self.inner.name,
            round = round_no,
            exceptions = round.exception_list.len(),
            "committed"
        );

        if t.is_root(view) {
            drop(round);
            return self.finalize_commits(view, round_no, handle).await;
        }
        let payload = Payload::Commitment(round.commitment());
        drop(round);
        self.send_up(view, payload).await
    }

    /// Root only: derive `c = H(merkle_root ‖ V̂)` and start Challenge.
    async fn finalize_commits(
        &self,
        view: ViewNumber,
        round_no: RoundNumber,
        handle: RoundHandle,
    ) -> Result<(), CosiError> {
        let msg = {
            let round = handle.lock().await;
            ChallengePayload {
                round: round_no,
                challenge: suite::challenge_scalar(&round.merkle_root, &round.agg_commit.value()),
                merkle_root: round.merkle_root,
                proof: Proof::new(),
            }
        };
        self.challenge_round(view, msg, handle).await
    }

    // ── Challenge ───────────────────────────────────────────────────

    /// Challenge received from the parent.
    pub async fn challenge(&self, view: ViewNumber, msg: ChallengePayload) -> Result<(), CosiError> {
        let handle = self
            .inner
            .table
            .lock()
            .await
            .get(msg.round)
            .ok_or(CosiError::UnknownRound(msg.round))?;
        self.challenge_round(view, msg, handle).await
    }

    async fn challenge_round(
        &self,
        view: ViewNumber,
        msg: ChallengePayload,
        handle: RoundHandle,
    ) -> Result<(), CosiError> {
        let round_no = msg.round;
        if self.failures().await.is_dead(Phase::Challenge) {
            tracing::debug!(node = %self.inner.name, round = round_no, "playing dead, ignoring challenge");
            self.retire(round_no).await;
            return Ok(());
        }

        let children = self.inner.transport.children(view);
        let mut round = handle.lock().await;
        round.challenge = Some(msg.challenge);
        round.global_root = Some(msg.merkle_root);
        round.state = RoundState::Challenged;

        let mut local_proof = round.proof_for(&LeafSource::Local).cloned().unwrap_or_default();
        local_proof.extend(&msg.proof);
        let items = round
            .local_items
            .iter()
            .map(|(leaf, proof)| {
                let mut proof = proof.clone();
                proof.extend(&local_proof);
                (*leaf, proof)
            })
            .collect();
        self.emit(CosiEvent::ProofReady {
            round: round_no,
            merkle_root: msg.merkle_root,
            local_root: round.local_merkle_root,
            proof: local_proof,
            items,
        });

        let payloads: Vec<Payload> = children
            .iter()
            .map(|child| {
                let mut proof = round
                    .proof_for(&LeafSource::Child(child.clone()))
                    .cloned()
                    .unwrap_or_default();
                proof.extend(&msg.proof);
                Payload::Challenge(ChallengePayload {
                    round: round_no,
                    challenge: msg.challenge,
                    merkle_root: msg.merkle_root,
                    proof,
                })
            })
            .collect();
        drop(round);

        if !payloads.is_empty() {
            if let Err(e) = self.send_down(view, payloads).await {
                tracing::warn!(node = %self.inner.name, round = round_no, "challenge to children: {e}");
            }
        }
        self.respond(view, round_no, handle).await
    }

    // ── Respond ─────────────────────────────────────────────────────

    async fn respond(&self, view: ViewNumber, round_no: RoundNumber, handle: RoundHandle) -> Result<(), CosiError> {
        let failures = self.failures().await;
        if failures.is_dead(Phase::Response) {
            tracing::debug!(node = %self.inner.name, round = round_no, "playing dead, not responding");
            self.retire(round_no).await;
            return Ok(());
        }

        let t = &self.inner.transport;
        let children = t.children(view);
        let timeout = self.inner.config.round_timeout(t.height(view));
        let is_root = t.is_root(view);

        let mut round = handle.lock().await;
        if round.begin_response(self.inner.keypair.secret()).is_none() {
            tracing::debug!(node = %self.inner.name, round = round_no, "no commitment this round, not responding");
            drop(round);
            self.retire(round_no).await;
            return Ok(());
        }
        let mut replies = match round.response_rx.take() {
            Some(mut rx) => gather(&mut rx, &children, timeout).await,
            None => Default::default(),
        };

        let roster = self.inner.roster.lock().await.clone();
        for child in &children {
            match replies.remove(child) {
                Some(ChildReply::Response(msg)) => {
                    if !round.fold_response(child, &msg) {
                        tracing::debug!(node = %self.inner.name, round = round_no, "ignoring response from {child}: it did not commit");
                    }
                }
                Some(ChildReply::Error(reason)) => {
                    drop(round);
                    return self.abandon(view, round_no, is_root, child.clone(), reason).await;
                }
                None => {
                    if round.except_silent_child(child, roster.get(child)) {
                        tracing::warn!(node = %self.inner.name, round = round_no, "{child} committed but did not respond, excepting");
                    }
                }
            }
        }
        round.apply_exceptions();
        round.state = RoundState::Responded;

        let t_point = match round.verify(is_root) {
            Ok(t_point) => t_point,
            Err(reason) => {
                drop(round);
                tracing::warn!(node = %self.inner.name, round = round_no, "verification failed: {reason}");
                self.retire(round_no).await;
                if !is_root {
                    let err = Payload::Error(ErrorPayload {
                        round: round_no,
                        reason: reason.clone(),
                    });
                    if let Err(e) = self.send_up(view, err).await {
                        tracing::warn!(node = %self.inner.name, round = round_no, "error to parent: {e}");
                    }
                }
                return Err(CosiError::VerificationFailed {
                    round: round_no,
                    reason,
                });
            }
        };

        let summary = RoundSummary {
            round: round_no,
            view,
            node: self.name(),
            agg_pubkey: round.agg_pubkey.value(),
            exceptions: round.exception_list.clone(),
            merkle_root: round.merkle_root,
        };
        let done = is_root.then(|| RoundDone {
            round: round_no,
            view,
            merkle_root: round.merkle_root,
            log_hash: round.log_hash,
            proof: round.proof_for(&LeafSource::Log).cloned().unwrap_or_default(),
            signature: CollectiveSignature {
                challenge: round.challenge.unwrap_or(Scalar::ZERO),
                response: round.agg_response,
                exception_commit: round.exception_agg_commit.value(),
                exceptions: round.exception_list.clone(),
            },
            agg_pubkey: round.agg_pubkey.value(),
        });
        let mut response = round.response_payload();
        drop(round);
        self.retire(round_no).await;

        tracing::debug!(node = %self.inner.name, round = round_no, "verified (T = {:?})", t_point.compress());
        self.emit(CosiEvent::RoundVerified(summary));
        if let Some(done) = done {
            tracing::info!(
                node = %self.inner.name,
                round = round_no,
                exceptions = done.signature.exceptions.len(),
                "round committed"
            );
            self.emit(CosiEvent::RoundCommitted(done));
            return Ok(());
        }

        if failures.corrupts_response() {
            response.r_hat += Scalar::ONE;
        }
        self.send_up(view, Payload::Response(response)).await
    }

    /// A child reported failure: relay it upward and drop the round.
    async fn abandon(
        &self,
        view: ViewNumber,
        round_no: RoundNumber,
        is_root: bool,
        child: crate::types::NodeName,
        reason: String,
    ) -> Result<(), CosiError> {
        tracing::warn!(node = %self.inner.name, round = round_no, "{child} failed: {reason}");
        self.retire(round_no).await;
        if !is_root {
            let err = Payload::Error(ErrorPayload {
                round: round_no,
                reason: format!("{child}: {reason}"),
            });
            if let Err(e) = self.send_up(view, err).await {
                tracing::warn!(node = %self.inner.name, round = round_no, "error to parent: {e}");
            }
        }
        Err(CosiError::ChildFailed {
            round: round_no,
            child,
            reason,
        })
    }

    async fn retire(&self, round: RoundNumber) {
        self.inner.table.lock().await.retire(round);
    }
}
