use serde::Serialize;
use std::io::Write;

use cosi_protocol::{PublicKey, RoundDone, VoteOutcome};

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn keys_hex(keys: &[PublicKey]) -> Vec<String> {
    keys.iter().map(|k| hex(&k.to_bytes())).collect()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub mode: String,
    pub root: String,
    pub hosts: Vec<String>,
}

impl EventStarted {
    pub fn new(mode: &str, root: &str, hosts: Vec<String>) -> Self {
        Self {
            event: "started",
            mode: mode.to_string(),
            root: root.to_string(),
            hosts,
        }
    }
}

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub mode: String,
    pub ok: u32,
    pub failed: u32,
    pub elapsed_s: f64,
}

// ── Round events ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventRound {
    pub event: &'static str,
    pub round: u64,
    pub view: u64,
    pub merkle_root: String,
    pub exceptions: Vec<String>,
    pub verified: bool,
    pub elapsed_s: f64,
}

impl EventRound {
    pub fn new(done: &RoundDone, elapsed_s: f64) -> Self {
        Self {
            event: "round",
            round: done.round,
            view: done.view,
            merkle_root: hex(&done.merkle_root),
            exceptions: keys_hex(&done.signature.exceptions),
            verified: done.signature.verify(&done.merkle_root, &done.agg_pubkey),
            elapsed_s,
        }
    }
}

#[derive(Serialize)]
pub struct EventFailed {
    pub event: &'static str,
    pub step: String,
    pub error: String,
}

impl EventFailed {
    pub fn new(step: &str, error: impl std::fmt::Display) -> Self {
        Self {
            event: "failed",
            step: step.to_string(),
            error: error.to_string(),
        }
    }
}

// ── View-change and vote events ─────────────────────────────────

#[derive(Serialize)]
pub struct EventViewChange {
    pub event: &'static str,
    pub proposer: String,
    pub view: u64,
    pub accepted: bool,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventVote {
    pub event: &'static str,
    pub vote_id: u64,
    pub subject: String,
    pub accept: u64,
    pub reject: u64,
    pub abstain: u64,
    pub accepted: bool,
}

impl EventVote {
    pub fn new(outcome: &VoteOutcome, hosts: usize) -> Self {
        Self {
            event: "vote",
            vote_id: outcome.vote_id,
            subject: outcome.kind.subject().to_string(),
            accept: outcome.tally.accept,
            reject: outcome.tally.reject,
            abstain: outcome.tally.abstain(hosts),
            accepted: outcome.accepted,
        }
    }
}
