/// Node: the CoSi protocol engine for one host.
///
/// Owns the host's key pair, round table and view state, and drives the
/// four signing phases, view changes and group-change votes over a
/// [`Transport`]. A single listener task decodes inbound envelopes and
/// either hands them to a spawned phase handler (Announce, Challenge,
/// ViewChange, heartbeats, votes) or routes them into a per-round / per-vote channel
/// that a waiting phase driver reads.
mod liveness;
mod phases;
mod table;
mod view_change;
mod vote;

pub use liveness::designated_root;
pub use vote::{AcceptAll, VotePolicy};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use cosi_transport::Incoming;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::error::CosiError;
use crate::events::CosiEvent;
use crate::message::{Envelope, Payload};
use crate::roster::Roster;
use crate::round::ChildReply;
use crate::suite::{Keypair, NonceStream, PublicKey};
use crate::transport::Transport;
use crate::types::{NodeName, Phase, RoundNumber, ViewNumber};

use liveness::RootWatch;
use table::RoundTable;

// ── Failure injection ───────────────────────────────────────────────

/// Faults a node plays out, for exercising exception handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePlan {
    dead: HashSet<Phase>,
    corrupt_response: bool,
}

impl FailurePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently skip `phase` and everything after it in a round.
    pub fn dead(mut self, phase: Phase) -> Self {
        self.dead.insert(phase);
        self
    }

    /// Send a response whose `r̂` is off by one.
    pub fn corrupt_response(mut self) -> Self {
        self.corrupt_response = true;
        self
    }

    pub fn is_dead(&self, phase: Phase) -> bool {
        self.dead.contains(&phase)
    }

    pub fn corrupts_response(&self) -> bool {
        self.corrupt_response
    }
}

// ── Node ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct ViewState {
    current: ViewNumber,
    /// View being installed, if any. Announce is refused while set.
    changing: Option<ViewNumber>,
}

struct Inner<T> {
    name: NodeName,
    keypair: Keypair,
    config: NodeConfig,
    transport: T,
    roster: Mutex<Roster>,
    table: Mutex<RoundTable>,
    views: Mutex<ViewState>,
    nonces: Mutex<NonceStream>,
    pending: Mutex<Vec<Vec<u8>>>,
    failures: Mutex<FailurePlan>,
    policy: Mutex<Arc<dyn VotePolicy>>,
    next_vote_id: AtomicU64,
    watch: RootWatch,
    events: mpsc::Sender<CosiEvent>,
}

/// Handle to a running CoSi node. Cheap to clone.
pub struct Node<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Node<T> {
    /// Create a node and the receiver for its events.
    ///
    /// The node starts in view 0. Call [`Node::start`] to begin
    /// processing inbound traffic.
    pub fn new(
        transport: T,
        keypair: Keypair,
        roster: Roster,
        config: NodeConfig,
    ) -> (Self, mpsc::Receiver<CosiEvent>) {
        let name = transport.name();
        let nonces = if config.deterministic_nonces {
            NonceStream::deterministic(&name, &keypair)
        } else {
            NonceStream::new(&name, &keypair)
        };
        let (events, events_rx) = mpsc::channel(config.event_buffer);
        let inner = Inner {
            name,
            keypair,
            table: Mutex::new(RoundTable::new(config.max_outstanding_rounds)),
            config,
            transport,
            roster: Mutex::new(roster),
            views: Mutex::new(ViewState::default()),
            nonces: Mutex::new(nonces),
            pending: Mutex::new(Vec::new()),
            failures: Mutex::new(FailurePlan::new()),
            policy: Mutex::new(Arc::new(AcceptAll)),
            next_vote_id: AtomicU64::new(0),
            watch: RootWatch::new(),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Spawn the listener (and the liveness watch, if configured).
    pub fn start(&self, inbound: mpsc::Receiver<Incoming>) -> JoinHandle<()> {
        if let Some(timeout) = self.inner.config.heartbeat_timeout {
            liveness::spawn_watch(self, timeout);
        }
        let node = self.clone();
        tokio::spawn(async move { node.listen(inbound).await })
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn name(&self) -> NodeName {
        self.inner.name.clone()
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.keypair.public()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub async fn current_view(&self) -> ViewNumber {
        self.inner.views.lock().await.current
    }

    pub async fn is_changing_view(&self) -> bool {
        self.inner.views.lock().await.changing.is_some()
    }

    pub async fn last_seen_round(&self) -> RoundNumber {
        self.inner.table.lock().await.last_seen_round()
    }

    /// Rounds currently open at this node.
    pub async fn outstanding_rounds(&self) -> usize {
        self.inner.table.lock().await.len()
    }

    pub async fn roster(&self) -> Roster {
        self.inner.roster.lock().await.clone()
    }

    /// Queue local data; it becomes this node's private Merkle leaves in
    /// the next Commit.
    pub async fn submit(&self, data: Vec<u8>) {
        self.inner.pending.lock().await.push(data);
    }

    /// Start a freshly built node in `view` instead of view 0.
    pub(crate) async fn adopt_view(&self, view: ViewNumber) {
        let mut views = self.inner.views.lock().await;
        if views.current < view {
            views.current = view;
        }
    }

    pub async fn set_failures(&self, plan: FailurePlan) {
        *self.inner.failures.lock().await = plan;
    }

    pub async fn set_vote_policy(&self, policy: Arc<dyn VotePolicy>) {
        *self.inner.policy.lock().await = policy;
    }

    async fn failures(&self) -> FailurePlan {
        self.inner.failures.lock().await.clone()
    }

    async fn ensure_stable(&self) -> Result<(), CosiError> {
        match self.inner.views.lock().await.changing {
            Some(view) => Err(CosiError::ViewChanging { view }),
            None => Ok(()),
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Decode and dispatch inbound frames until the channel closes.
    /// Malformed frames are logged and skipped.
    pub async fn listen(&self, mut inbound: mpsc::Receiver<Incoming>) {
        while let Some((from, bytes)) = inbound.recv().await {
            let envelope = match Envelope::from_bytes(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(node = %self.inner.name, "dropping frame from {from}: {e}");
                    continue;
                }
            };
            if envelope.from != from {
                tracing::warn!(
                    node = %self.inner.name,
                    "dropping envelope claiming to be from {} on link from {from}",
                    envelope.from
                );
                continue;
            }
            self.dispatch(envelope).await;
        }
        tracing::debug!(node = %self.inner.name, "listener stopped");
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            view,
            from,
            payload,
            ..
        } = envelope;
        tracing::debug!(node = %self.inner.name, "{:?} from {from} (view {view})", payload.msg_type());
        let t = &self.inner.transport;

        match payload {
            // ── Down the tree: spawn a handler ──────────────────────
            Payload::Announcement(msg) => {
                if !t.is_parent(view, &from) {
                    tracing::warn!(node = %self.inner.name, "announcement from non-parent {from}");
                    return;
                }
                self.inner.watch.touch();
                let node = self.clone();
                tokio::spawn(async move {
                    let round = msg.round;
                    if let Err(e) = node.announce(view, msg).await {
                        node.log_failure("announce", round, &e);
                    }
                });
            }
            Payload::Challenge(msg) => {
                if !t.is_parent(view, &from) {
                    tracing::warn!(node = %self.inner.name, "challenge from non-parent {from}");
                    return;
                }
                let node = self.clone();
                tokio::spawn(async move {
                    let round = msg.round;
                    if let Err(e) = node.challenge(view, msg).await {
                        node.log_failure("challenge", round, &e);
                    }
                });
            }
            Payload::ViewChange(msg) => {
                let node = self.clone();
                tokio::spawn(async move {
                    let target = msg.view;
                    if let Err(e) = node.handle_view_change(from, msg).await {
                        tracing::warn!(node = %node.inner.name, "view change to {target}: {e}");
                    }
                });
            }
            Payload::ViewConfirmed(msg) => {
                let node = self.clone();
                tokio::spawn(async move { node.handle_view_confirmed(from, msg).await });
            }
            Payload::Heartbeat(msg) => {
                let node = self.clone();
                tokio::spawn(async move { node.handle_heartbeat(from, msg).await });
            }
            Payload::VoteRequest(req) if t.is_parent(view, &from) => {
                let node = self.clone();
                tokio::spawn(async move {
                    let vote_id = req.vote_id;
                    if let Err(e) = node.handle_vote_request(view, req).await {
                        tracing::warn!(node = %node.inner.name, "vote {vote_id}: {e}");
                    }
                });
            }
            Payload::VoteOutcome(outcome) => {
                let node = self.clone();
                tokio::spawn(async move { node.handle_vote_outcome(view, from, outcome).await });
            }

            // ── Up the tree: route to the waiting driver ────────────
            Payload::Commitment(msg) => {
                let round = msg.round;
                let tx = self.inner.table.lock().await.commit_sender(round);
                self.route(tx, (from, msg), "commitment", round);
            }
            Payload::Response(msg) => {
                let round = msg.round;
                let tx = self.inner.table.lock().await.response_sender(round);
                self.route(tx, (from, ChildReply::Response(msg)), "response", round);
            }
            Payload::Error(msg) => {
                let round = msg.round;
                let tx = self.inner.table.lock().await.response_sender(round);
                self.route(tx, (from, ChildReply::Error(msg.reason)), "error", round);
            }
            Payload::ViewAccepted(msg) => {
                let tx = self.inner.table.lock().await.view_vote_sender(msg.view);
                self.route(tx, (from, msg.votes), "view acceptance", msg.view);
            }
            Payload::VoteRequest(req) => {
                let tx = self.inner.table.lock().await.group_vote_sender(req.vote_id);
                self.route(tx, (from, req.tally), "vote tally", req.vote_id);
            }
        }
    }

    /// Hand a message to a waiting driver. Never blocks the listener.
    fn route<M>(&self, tx: Option<mpsc::Sender<M>>, msg: M, what: &str, key: u64) {
        match tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(msg) {
                    tracing::warn!(node = %self.inner.name, "dropping {what} for {key}: {e}");
                }
            }
            None => {
                tracing::debug!(node = %self.inner.name, "no one waiting for {what} {key}");
            }
        }
    }

    fn log_failure(&self, phase: &str, round: RoundNumber, err: &CosiError) {
        match err {
            CosiError::PastRound { .. } | CosiError::UnknownRound(_) => {
                tracing::debug!(node = %self.inner.name, round, "{phase}: {err}");
            }
            _ => tracing::warn!(node = %self.inner.name, round, "{phase}: {err}"),
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    fn envelope(&self, view: ViewNumber, payload: Payload) -> Envelope {
        Envelope::new(view, self.inner.name.clone(), payload)
    }

    async fn send_up(&self, view: ViewNumber, payload: Payload) -> Result<(), CosiError> {
        let bytes = self.envelope(view, payload).to_bytes()?;
        self.inner.transport.put_up(view, bytes).await?;
        Ok(())
    }

    /// One payload per child, in child order.
    async fn send_down(&self, view: ViewNumber, payloads: Vec<Payload>) -> Result<(), CosiError> {
        let frames = payloads
            .into_iter()
            .map(|p| self.envelope(view, p).to_bytes())
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.transport.put_down(view, frames).await?;
        Ok(())
    }

    /// Same payload to every child of `view`; a no-op for leaves.
    async fn broadcast_down(&self, view: ViewNumber, payload: Payload) {
        let n = self.inner.transport.children(view).len();
        if n == 0 {
            return;
        }
        if let Err(e) = self.send_down(view, vec![payload; n]).await {
            tracing::warn!(node = %self.inner.name, "broadcast in view {view}: {e}");
        }
    }

    /// Surface an event to the application. Never blocks.
    fn emit(&self, event: CosiEvent) {
        if let Err(e) = self.inner.events.try_send(event) {
            tracing::warn!(node = %self.inner.name, "event dropped: {e}");
        }
    }
}

/// Collect at most one message per expected sender, until all have
/// answered or `timeout` elapses. Missing senders are simply absent.
async fn gather<M>(
    rx: &mut mpsc::Receiver<(NodeName, M)>,
    expected: &[NodeName],
    timeout: Duration,
) -> HashMap<NodeName, M> {
    let mut replies = HashMap::new();
    if expected.is_empty() {
        return replies;
    }
    let deadline = tokio::time::Instant::now() + timeout;
    while replies.len() < expected.len() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some((from, msg))) => {
                if !expected.contains(&from) {
                    tracing::debug!("ignoring reply from unexpected sender {from}");
                    continue;
                }
                if replies.contains_key(&from) {
                    tracing::debug!("ignoring duplicate reply from {from}");
                    continue;
                }
                replies.insert(from, msg);
            }
            Ok(None) | Err(_) => break,
        }
    }
    replies
}

/// Strict two-thirds threshold: a decision needs more than this many votes.
pub fn quorum_threshold(hosts: usize) -> u64 {
    (2 * hosts / 3) as u64
}
