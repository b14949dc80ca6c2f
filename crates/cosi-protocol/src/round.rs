//! Per-round state owned by one node.
//!
//! A round is born on Announce, filled in by Commit, Challenge and
//! Respond, and retired once Respond finishes (or fails). Only the task
//! driving the round's phases touches it.
use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::merkle::{self, HashId, Proof};
use crate::message::{CommitmentPayload, ResponsePayload};
use crate::suite::{self, Accumulator, Point, PublicKey, Secret};
use crate::types::{NodeName, RoundNumber, ViewNumber};

/// Who contributed a Merkle leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeafSource {
    /// Subtree root reported by a child.
    Child(NodeName),
    /// Root over this node's own submitted data.
    Local,
    /// Hash of this node's commit log.
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Announced,
    Committed,
    Challenged,
    Responded,
}

/// What a child sends up in the response phase.
#[derive(Debug, Clone)]
pub enum ChildReply {
    Response(ResponsePayload),
    Error(String),
}

pub(crate) type CommitRx = mpsc::Receiver<(NodeName, CommitmentPayload)>;
pub(crate) type ResponseRx = mpsc::Receiver<(NodeName, ChildReply)>;

#[derive(Debug)]
pub struct Round {
    pub number: RoundNumber,
    pub view: ViewNumber,
    pub state: RoundState,
    /// Announcement data.
    pub data: Vec<u8>,

    pub challenge: Option<Secret>,
    pub response: Option<Secret>,
    /// `v`
    pub commit_secret: Option<Secret>,
    /// `V = g^v`
    pub commit_point: Point,
    /// `V̂`
    pub agg_commit: Accumulator,
    /// `X̂`
    pub agg_pubkey: Accumulator,
    /// `r̂`
    pub agg_response: Secret,

    /// Root of this node's subtree.
    pub merkle_root: HashId,
    /// Root of the whole tree, known from Challenge on.
    pub global_root: Option<HashId>,
    pub local_merkle_root: HashId,
    pub log_hash: HashId,
    /// Sorted leaves with their source and proof (same index).
    pub leaves: Vec<HashId>,
    pub leaves_from: Vec<LeafSource>,
    pub proofs: Vec<Proof>,
    /// Submitted items with their proof against `local_merkle_root`.
    pub local_items: Vec<(HashId, Proof)>,

    pub exception_list: Vec<PublicKey>,
    pub exception_agg_commit: Accumulator,
    pub exception_agg_pubkey: Accumulator,
    pub child_agg_commit: HashMap<NodeName, Point>,
    pub child_agg_pubkey: HashMap<NodeName, Point>,

    pub(crate) commit_rx: Option<CommitRx>,
    pub(crate) response_rx: Option<ResponseRx>,
}

impl Round {
    pub(crate) fn new(
        number: RoundNumber,
        view: ViewNumber,
        data: Vec<u8>,
        commit_rx: CommitRx,
        response_rx: ResponseRx,
    ) -> Self {
        Self {
            commit_rx: Some(commit_rx),
            response_rx: Some(response_rx),
            ..Self::detached(number, view, data)
        }
    }

    /// Round without fan-in channels.
    pub fn detached(number: RoundNumber, view: ViewNumber, data: Vec<u8>) -> Self {
        Self {
            number,
            view,
            state: RoundState::Announced,
            data,
            challenge: None,
            response: None,
            commit_secret: None,
            commit_point: Accumulator::new().value(),
            agg_commit: Accumulator::new(),
            agg_pubkey: Accumulator::new(),
            agg_response: Secret::ZERO,
            merkle_root: merkle::ZERO_HASH,
            global_root: None,
            local_merkle_root: merkle::ZERO_HASH,
            log_hash: merkle::ZERO_HASH,
            leaves: Vec::new(),
            leaves_from: Vec::new(),
            proofs: Vec::new(),
            local_items: Vec::new(),
            exception_list: Vec::new(),
            exception_agg_commit: Accumulator::new(),
            exception_agg_pubkey: Accumulator::new(),
            child_agg_commit: HashMap::new(),
            child_agg_pubkey: HashMap::new(),
            commit_rx: None,
            response_rx: None,
        }
    }

    // ── Commit ──────────────────────────────────────────────────────

    /// Seed the aggregates with this node's own commitment and key.
    pub fn begin_commit(&mut self, v: Secret, key: &PublicKey) {
        self.commit_secret = Some(v);
        self.commit_point = suite::base_mul(&v);
        self.agg_commit = Accumulator::from(self.commit_point);
        self.agg_pubkey = Accumulator::from(key.point());
    }

    /// Add `key` to the exception list unless already listed.
    pub fn add_exception(&mut self, key: PublicKey) -> bool {
        if self.exception_list.contains(&key) {
            return false;
        }
        self.exception_list.push(key);
        true
    }

    pub fn add_exceptions(&mut self, keys: &[PublicKey]) {
        for key in keys {
            self.add_exception(*key);
        }
    }

    /// Fold a child's commitment into the subtree aggregates.
    pub fn fold_commitment(&mut self, child: &NodeName, msg: &CommitmentPayload) {
        self.agg_commit.add(&msg.v_hat);
        self.agg_pubkey.add(&msg.x_hat);
        self.child_agg_commit.insert(child.clone(), msg.v_hat);
        self.child_agg_pubkey.insert(child.clone(), msg.x_hat);
        self.add_exceptions(&msg.exceptions);
    }

    /// Hash over everything this node committed to in the round.
    pub fn commit_log_hash(&self) -> HashId {
        let mut hasher = Sha256::new();
        hasher.update(b"cosi/commit-log/v1");
        hasher.update(self.number.to_le_bytes());
        hasher.update(merkle::hash_bytes(&self.data));
        hasher.update(self.commit_point.compress().as_bytes());
        hasher.update(self.agg_commit.value().compress().as_bytes());
        hasher.update(self.agg_pubkey.value().compress().as_bytes());
        for key in &self.exception_list {
            hasher.update(key.to_bytes());
        }
        hasher.finalize().into()
    }

    /// Build the subtree Merkle tree from child roots, this node's own
    /// items and its commit log. Leaves are sorted by hash.
    pub fn build_merkle(&mut self, child_roots: Vec<(NodeName, HashId)>, items: &[Vec<u8>]) {
        let mut item_hashes: Vec<HashId> = items.iter().map(|i| merkle::hash_bytes(i)).collect();
        item_hashes.sort();
        let (local_root, item_proofs) = merkle::proof_tree(&item_hashes);
        self.local_merkle_root = local_root;
        self.local_items = item_hashes.into_iter().zip(item_proofs).collect();
        self.log_hash = self.commit_log_hash();

        let mut tagged: Vec<(HashId, LeafSource)> = child_roots
            .into_iter()
            .map(|(child, root)| (root, LeafSource::Child(child)))
            .collect();
        tagged.push((self.local_merkle_root, LeafSource::Local));
        tagged.push((self.log_hash, LeafSource::Log));
        tagged.sort_by(|a, b| a.0.cmp(&b.0));

        let (leaves, sources): (Vec<HashId>, Vec<LeafSource>) = tagged.into_iter().unzip();
        let (root, proofs) = merkle::proof_tree(&leaves);
        self.merkle_root = root;
        self.leaves = leaves;
        self.leaves_from = sources;
        self.proofs = proofs;
        self.state = RoundState::Committed;
    }

    /// Proof of the leaf contributed by `source` against `merkle_root`.
    pub fn proof_for(&self, source: &LeafSource) -> Option<&Proof> {
        let idx = self.leaves_from.iter().position(|s| s == source)?;
        self.proofs.get(idx)
    }

    /// Commitment message for the parent.
    pub fn commitment(&self) -> CommitmentPayload {
        CommitmentPayload {
            round: self.number,
            v: self.commit_point,
            v_hat: self.agg_commit.value(),
            x_hat: self.agg_pubkey.value(),
            merkle_root: self.merkle_root,
            exceptions: self.exception_list.clone(),
        }
    }

    // ── Respond ─────────────────────────────────────────────────────

    /// `r = v − x·c`. `None` if the node never committed or was never
    /// challenged.
    pub fn begin_response(&mut self, secret: &Secret) -> Option<Secret> {
        let (v, c) = (self.commit_secret?, self.challenge?);
        let r = v - secret * c;
        self.response = Some(r);
        self.agg_response = r;
        Some(r)
    }

    /// Fold a child's response. Ignored (returns false) when the child
    /// has no recorded commitment this round.
    pub fn fold_response(&mut self, child: &NodeName, msg: &ResponsePayload) -> bool {
        if !self.child_agg_commit.contains_key(child) {
            return false;
        }
        self.agg_response += msg.r_hat;
        self.exception_agg_commit.add(&msg.exception_v_hat);
        self.exception_agg_pubkey.add(&msg.exception_x_hat);
        self.add_exceptions(&msg.exceptions);
        true
    }

    /// Account for a child that committed but sent no response: its key
    /// joins the exception list and its recorded contributions join the
    /// exception accumulators. A child that never committed was excepted
    /// during Commit and is left alone.
    pub fn except_silent_child(&mut self, child: &NodeName, key: Option<PublicKey>) -> bool {
        let (Some(v_hat), Some(x_hat)) = (
            self.child_agg_commit.get(child).copied(),
            self.child_agg_pubkey.get(child).copied(),
        ) else {
            return false;
        };
        if let Some(key) = key {
            self.add_exception(key);
        }
        self.exception_agg_commit.add(&v_hat);
        self.exception_agg_pubkey.add(&x_hat);
        true
    }

    /// Remove excepted subtrees from the aggregate key.
    pub fn apply_exceptions(&mut self) {
        let excluded = self.exception_agg_pubkey.value();
        self.agg_pubkey.sub(&excluded);
    }

    /// Check `r̂·G + c·X̂ + E_V == V̂`, and at the root that the challenge
    /// recomputed from `T` matches. Returns `T` on success.
    pub fn verify(&self, is_root: bool) -> Result<Point, String> {
        let c = self.challenge.ok_or("no challenge recorded")?;
        let t = suite::base_mul(&self.agg_response)
            + self.agg_pubkey.value() * c
            + self.exception_agg_commit.value();
        if t != self.agg_commit.value() {
            return Err("aggregate response does not match aggregate commitment".into());
        }
        if is_root && suite::challenge_scalar(&self.merkle_root, &t) != c {
            return Err("recomputed challenge does not match".into());
        }
        Ok(t)
    }

    /// Response message for the parent.
    pub fn response_payload(&self) -> ResponsePayload {
        ResponsePayload {
            round: self.number,
            r_hat: self.agg_response,
            exceptions: self.exception_list.clone(),
            exception_v_hat: self.exception_agg_commit.value(),
            exception_x_hat: self.exception_agg_pubkey.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{Keypair, NonceStream};

    struct Signer {
        name: NodeName,
        kp: Keypair,
        round: Round,
    }

    fn signer(name: &str) -> Signer {
        let kp = Keypair::from_seed(name.as_bytes());
        let node = NodeName::from(name);
        let mut round = Round::detached(1, 0, b"Hello World".to_vec());
        let v = NonceStream::deterministic(&node, &kp).next(1);
        round.begin_commit(v, &kp.public());
        Signer {
            name: node,
            kp,
            round,
        }
    }

    /// Parent with two leaf children. `b_responds` decides whether the
    /// second child answers the challenge.
    fn run_two_level(b_responds: bool) -> (Signer, Signer, Signer) {
        let mut parent = signer("P");
        let mut a = signer("A");
        let mut b = signer("B");

        a.round.build_merkle(vec![], &[]);
        b.round.build_merkle(vec![], &[b"item".to_vec()]);
        let ca = a.round.commitment();
        let cb = b.round.commitment();
        parent.round.fold_commitment(&a.name, &ca);
        parent.round.fold_commitment(&b.name, &cb);
        parent.round.build_merkle(
            vec![(a.name.clone(), ca.merkle_root), (b.name.clone(), cb.merkle_root)],
            &[],
        );

        let c = suite::challenge_scalar(&parent.round.merkle_root, &parent.round.agg_commit.value());
        for s in [&mut parent, &mut a, &mut b] {
            s.round.challenge = Some(c);
        }

        let secret_p = *parent.kp.secret();
        parent.round.begin_response(&secret_p).unwrap();

        let secret_a = *a.kp.secret();
        a.round.begin_response(&secret_a).unwrap();
        a.round.apply_exceptions();
        assert!(a.round.verify(false).is_ok());
        assert!(parent.round.fold_response(&a.name, &a.round.response_payload()));

        if b_responds {
            let secret_b = *b.kp.secret();
            b.round.begin_response(&secret_b).unwrap();
            b.round.apply_exceptions();
            assert!(parent.round.fold_response(&b.name, &b.round.response_payload()));
        } else {
            let key = b.kp.public();
            assert!(parent.round.except_silent_child(&b.name, Some(key)));
        }

        parent.round.apply_exceptions();
        (parent, a, b)
    }

    #[test]
    fn full_participation_verifies_at_root() {
        let (parent, a, b) = run_two_level(true);
        assert!(parent.round.verify(true).is_ok());
        let expected = parent.kp.public().point() + a.kp.public().point() + b.kp.public().point();
        assert_eq!(parent.round.agg_pubkey.value(), expected);
        assert!(parent.round.exception_list.is_empty());
    }

    #[test]
    fn committed_but_silent_child_is_excepted() {
        let (parent, a, b) = run_two_level(false);
        assert!(parent.round.verify(true).is_ok());
        let live = parent.kp.public().point() + a.kp.public().point();
        assert_eq!(parent.round.agg_pubkey.value(), live);
        assert_eq!(parent.round.exception_list, vec![b.kp.public()]);
    }

    #[test]
    fn tampered_response_fails() {
        let (mut parent, _a, _b) = run_two_level(true);
        parent.round.agg_response += Secret::ONE;
        assert!(parent.round.verify(true).is_err());
    }

    #[test]
    fn response_from_uncommitted_child_is_skipped() {
        let mut parent = signer("P");
        let ghost = NodeName::from("ghost");
        let msg = ResponsePayload {
            round: 1,
            r_hat: Secret::ONE,
            exceptions: vec![],
            exception_v_hat: Accumulator::new().value(),
            exception_x_hat: Accumulator::new().value(),
        };
        assert!(!parent.round.fold_response(&ghost, &msg));
        assert!(!parent.round.except_silent_child(&ghost, None));
    }

    #[test]
    fn exceptions_are_not_duplicated() {
        let mut round = Round::detached(1, 0, vec![]);
        let key = Keypair::from_seed(b"C").public();
        assert!(round.add_exception(key));
        assert!(!round.add_exception(key));
        round.add_exceptions(&[key, key]);
        assert_eq!(round.exception_list.len(), 1);
    }

    proptest::proptest! {
        /// Whatever subset of leaf children goes silent in Respond, the
        /// parent still verifies and its live key is exactly the responders.
        #[test]
        fn silent_responders_are_excepted(silent in proptest::collection::vec(proptest::bool::ANY, 1..6)) {
            let mut parent = signer("P");
            let mut kids: Vec<Signer> = (0..silent.len()).map(|i| signer(&format!("K{i}"))).collect();
            let mut child_roots = Vec::new();
            for kid in &mut kids {
                kid.round.build_merkle(vec![], &[]);
                let msg = kid.round.commitment();
                parent.round.fold_commitment(&kid.name, &msg);
                child_roots.push((kid.name.clone(), msg.merkle_root));
            }
            parent.round.build_merkle(child_roots, &[]);

            let c = suite::challenge_scalar(&parent.round.merkle_root, &parent.round.agg_commit.value());
            parent.round.challenge = Some(c);
            let secret_p = *parent.kp.secret();
            parent.round.begin_response(&secret_p).unwrap();

            let mut live = parent.kp.public().point();
            for (kid, is_silent) in kids.iter_mut().zip(&silent) {
                if *is_silent {
                    parent.round.except_silent_child(&kid.name, Some(kid.kp.public()));
                    continue;
                }
                kid.round.challenge = Some(c);
                let secret = *kid.kp.secret();
                kid.round.begin_response(&secret).unwrap();
                parent.round.fold_response(&kid.name, &kid.round.response_payload());
                live += kid.kp.public().point();
            }
            parent.round.apply_exceptions();

            proptest::prop_assert!(parent.round.verify(true).is_ok());
            proptest::prop_assert_eq!(parent.round.agg_pubkey.value(), live);
            let silent_count = silent.iter().filter(|s| **s).count();
            proptest::prop_assert_eq!(parent.round.exception_list.len(), silent_count);
        }
    }

    #[test]
    fn every_leaf_source_has_a_valid_proof() {
        let (parent, a, _b) = run_two_level(true);
        let r = &parent.round;
        assert_eq!(r.leaves.len(), 4);
        for (leaf, proof) in r.leaves.iter().zip(&r.proofs) {
            assert!(proof.check(&r.merkle_root, leaf));
        }
        let child_proof = r.proof_for(&LeafSource::Child(a.name.clone())).unwrap();
        assert!(child_proof.check(&r.merkle_root, &a.round.merkle_root));
        assert!(r.proof_for(&LeafSource::Local).is_some());
        assert!(r.proof_for(&LeafSource::Child("nobody".into())).is_none());
    }
}
