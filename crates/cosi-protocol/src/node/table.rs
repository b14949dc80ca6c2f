/// RoundTable: every piece of state shared between the listener task
/// and the phase drivers.
///
/// Rounds and their fan-in channels are keyed by round number; vote
/// channels are keyed by view number or vote id. Entries are removed
/// deterministically when the owning phase finishes.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::CosiError;
use crate::message::{CommitmentPayload, VoteTally};
use crate::round::{ChildReply, Round};
use crate::types::{NodeName, RoundNumber, ViewNumber};

pub(crate) type RoundHandle = Arc<Mutex<Round>>;

pub(crate) struct RoundTable {
    last_seen_round: RoundNumber,
    limit: usize,
    rounds: HashMap<RoundNumber, RoundHandle>,
    commit_tx: HashMap<RoundNumber, mpsc::Sender<(NodeName, CommitmentPayload)>>,
    response_tx: HashMap<RoundNumber, mpsc::Sender<(NodeName, ChildReply)>>,
    view_votes: HashMap<ViewNumber, mpsc::Sender<(NodeName, u64)>>,
    group_votes: HashMap<u64, mpsc::Sender<(NodeName, VoteTally)>>,
}

impl RoundTable {
    pub fn new(limit: usize) -> Self {
        Self {
            last_seen_round: 0,
            limit: limit.max(1),
            rounds: HashMap::new(),
            commit_tx: HashMap::new(),
            response_tx: HashMap::new(),
            view_votes: HashMap::new(),
            group_votes: HashMap::new(),
        }
    }

    pub fn last_seen_round(&self) -> RoundNumber {
        self.last_seen_round
    }

    /// Raise `last_seen_round` to at least `round`. Never lowers it.
    pub fn ratchet(&mut self, round: RoundNumber) {
        self.last_seen_round = self.last_seen_round.max(round);
    }

    pub fn next_round(&self) -> RoundNumber {
        self.last_seen_round + 1
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Register a round and its fan-in channels.
    ///
    /// Root: `round` must exceed `last_seen_round`. Others: `round` must
    /// not be registered. Rounds `limit` or more behind `round` are
    /// evicted first.
    pub fn open(
        &mut self,
        round: RoundNumber,
        view: ViewNumber,
        data: Vec<u8>,
        is_root: bool,
        fan_in: usize,
    ) -> Result<RoundHandle, CosiError> {
        if is_root && round <= self.last_seen_round {
            return Err(CosiError::PastRound {
                round,
                last_seen: self.last_seen_round,
            });
        }
        if self.rounds.contains_key(&round) {
            return Err(CosiError::PastRound {
                round,
                last_seen: self.last_seen_round,
            });
        }

        if let Some(floor) = round.checked_sub(self.limit as u64) {
            let stale: Vec<RoundNumber> =
                self.rounds.keys().copied().filter(|r| *r <= floor).collect();
            for r in stale {
                tracing::warn!("evicting stale round {r} (opening {round})");
                self.retire(r);
            }
        }
        if self.rounds.len() >= self.limit {
            return Err(CosiError::TooManyRounds { limit: self.limit });
        }

        let capacity = fan_in.max(1);
        let (commit_tx, commit_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::channel(capacity);
        let handle = Arc::new(Mutex::new(Round::new(
            round,
            view,
            data,
            commit_rx,
            response_rx,
        )));
        self.rounds.insert(round, handle.clone());
        self.commit_tx.insert(round, commit_tx);
        self.response_tx.insert(round, response_tx);
        self.ratchet(round);
        Ok(handle)
    }

    pub fn get(&self, round: RoundNumber) -> Option<RoundHandle> {
        self.rounds.get(&round).cloned()
    }

    /// Drop a round and its channels. Returns whether it was open.
    pub fn retire(&mut self, round: RoundNumber) -> bool {
        self.commit_tx.remove(&round);
        self.response_tx.remove(&round);
        self.rounds.remove(&round).is_some()
    }

    pub fn commit_sender(
        &self,
        round: RoundNumber,
    ) -> Option<mpsc::Sender<(NodeName, CommitmentPayload)>> {
        self.commit_tx.get(&round).cloned()
    }

    pub fn response_sender(&self, round: RoundNumber) -> Option<mpsc::Sender<(NodeName, ChildReply)>> {
        self.response_tx.get(&round).cloned()
    }

    // ── Vote channels ───────────────────────────────────────────────

    /// Open the acceptance channel for `view`. `None` if already open.
    pub fn open_view_votes(
        &mut self,
        view: ViewNumber,
        fan_in: usize,
    ) -> Option<mpsc::Receiver<(NodeName, u64)>> {
        if self.view_votes.contains_key(&view) {
            return None;
        }
        let (tx, rx) = mpsc::channel(fan_in.max(1));
        self.view_votes.insert(view, tx);
        Some(rx)
    }

    pub fn view_vote_sender(&self, view: ViewNumber) -> Option<mpsc::Sender<(NodeName, u64)>> {
        self.view_votes.get(&view).cloned()
    }

    pub fn close_view_votes(&mut self, view: ViewNumber) {
        self.view_votes.remove(&view);
    }

    /// Open the tally channel for `vote_id`. `None` if already open.
    pub fn open_group_votes(
        &mut self,
        vote_id: u64,
        fan_in: usize,
    ) -> Option<mpsc::Receiver<(NodeName, VoteTally)>> {
        if self.group_votes.contains_key(&vote_id) {
            return None;
        }
        let (tx, rx) = mpsc::channel(fan_in.max(1));
        self.group_votes.insert(vote_id, tx);
        Some(rx)
    }

    pub fn group_vote_sender(&self, vote_id: u64) -> Option<mpsc::Sender<(NodeName, VoteTally)>> {
        self.group_votes.get(&vote_id).cloned()
    }

    pub fn close_group_votes(&mut self, vote_id: u64) {
        self.group_votes.remove(&vote_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_rejects_past_rounds() {
        let mut table = RoundTable::new(8);
        table.open(3, 0, vec![], true, 1).unwrap();
        let err = table.open(2, 0, vec![], true, 1).unwrap_err();
        assert!(matches!(
            err,
            CosiError::PastRound {
                round: 2,
                last_seen: 3
            }
        ));
        assert!(table.open(3, 0, vec![], true, 1).is_err());
        assert!(table.open(4, 0, vec![], true, 1).is_ok());
    }

    #[test]
    fn non_root_accepts_any_unregistered_round() {
        let mut table = RoundTable::new(8);
        table.open(5, 0, vec![], false, 1).unwrap();
        table.open(2, 0, vec![], false, 1).unwrap();
        assert!(table.open(5, 0, vec![], false, 1).is_err());
        assert_eq!(table.last_seen_round(), 5);
    }

    #[test]
    fn last_seen_never_decreases() {
        let mut table = RoundTable::new(8);
        table.ratchet(10);
        table.ratchet(4);
        table.open(2, 0, vec![], false, 0).unwrap();
        assert_eq!(table.last_seen_round(), 10);
        assert_eq!(table.next_round(), 11);
    }

    #[test]
    fn retire_drops_round_and_channels() {
        let mut table = RoundTable::new(8);
        table.open(1, 0, vec![], true, 2).unwrap();
        assert!(table.commit_sender(1).is_some());
        assert!(table.retire(1));
        assert!(table.get(1).is_none());
        assert!(table.commit_sender(1).is_none());
        assert!(table.response_sender(1).is_none());
        assert!(!table.retire(1));
    }

    #[test]
    fn stale_rounds_are_evicted() {
        let mut table = RoundTable::new(2);
        table.open(1, 0, vec![], true, 1).unwrap();
        table.open(2, 0, vec![], true, 1).unwrap();
        // Round 3 evicts round 1 (3 - 2 = 1) and fits.
        table.open(3, 0, vec![], true, 1).unwrap();
        assert!(table.get(1).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn table_is_bounded() {
        let mut table = RoundTable::new(2);
        table.open(10, 0, vec![], false, 1).unwrap();
        table.open(11, 0, vec![], false, 1).unwrap();
        let err = table.open(9, 0, vec![], false, 1).unwrap_err();
        assert!(matches!(err, CosiError::TooManyRounds { limit: 2 }));
    }

    #[tokio::test]
    async fn channels_are_isolated_per_round() {
        let mut table = RoundTable::new(8);
        let one = table.open(1, 0, vec![], true, 1).unwrap();
        let two = table.open(2, 0, vec![], true, 1).unwrap();

        let msg = CommitmentPayload {
            round: 2,
            v: Default::default(),
            v_hat: Default::default(),
            x_hat: Default::default(),
            merkle_root: [0u8; 32],
            exceptions: vec![],
        };
        table
            .commit_sender(2)
            .unwrap()
            .try_send(("A".into(), msg))
            .unwrap();

        let mut rx_one = one.lock().await.commit_rx.take().unwrap();
        let mut rx_two = two.lock().await.commit_rx.take().unwrap();
        assert!(rx_one.try_recv().is_err());
        assert_eq!(rx_two.try_recv().unwrap().1.round, 2);
    }

    #[test]
    fn vote_channels_open_once() {
        let mut table = RoundTable::new(8);
        assert!(table.open_view_votes(1, 2).is_some());
        assert!(table.open_view_votes(1, 2).is_none());
        table.close_view_votes(1);
        assert!(table.open_view_votes(1, 2).is_some());
        assert!(table.open_group_votes(7, 0).is_some());
        assert!(table.group_vote_sender(7).is_some());
    }
}
