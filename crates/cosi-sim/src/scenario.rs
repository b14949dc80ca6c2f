//! Parsing of tree, failure and membership flags.
use anyhow::{anyhow, bail};
use cosi_protocol::{FailurePlan, Phase};
use std::collections::BTreeMap;

/// `"root:A,A:B,A:C"` → `[(root, A), (A, B), (A, C)]`.
pub fn parse_edges(s: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut edges = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (parent, child) = parse_pair(part)?;
        if parent == child {
            bail!("edge '{part}' links a host to itself");
        }
        if edges.iter().any(|(_, c)| *c == child) {
            bail!("host '{child}' has two parents");
        }
        edges.push((parent, child));
    }
    if edges.is_empty() {
        bail!("tree has no edges");
    }
    Ok(edges)
}

/// `"name:value"` with both sides non-empty.
pub fn parse_pair(s: &str) -> anyhow::Result<(String, String)> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected 'a:b', got '{s}'"))?;
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        bail!("expected 'a:b', got '{s}'");
    }
    Ok((a.to_string(), b.to_string()))
}

/// Fold `--dead host:phase` and `--corrupt host` flags into one plan per host.
pub fn failure_plans(
    dead: &[String],
    corrupt: &[String],
) -> anyhow::Result<BTreeMap<String, FailurePlan>> {
    let mut plans: BTreeMap<String, FailurePlan> = BTreeMap::new();
    for flag in dead {
        let (host, phase) = parse_pair(flag)?;
        let phase: Phase = phase.parse().map_err(|e: String| anyhow!(e))?;
        let plan = plans.remove(&host).unwrap_or_default();
        plans.insert(host, plan.dead(phase));
    }
    for host in corrupt {
        let plan = plans.remove(host).unwrap_or_default();
        plans.insert(host.clone(), plan.corrupt_response());
    }
    Ok(plans)
}
