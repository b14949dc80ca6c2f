//! Scenario runners. Each returns `(ok, failed)` step counts.
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use cosi_protocol::{CosiEvent, GroupChangeKind, LocalCluster, Node, NodeName};
use cosi_transport::LocalHost;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::events::{emit, EventFailed, EventRound, EventViewChange, EventVote};
use crate::scenario::parse_pair;

/// Settle time after a broadcast before the next step.
const PROPAGATION: Duration = Duration::from_millis(50);

pub struct RoundPlan {
    pub rounds: u32,
    pub concurrent: bool,
    pub data: Vec<u8>,
}

fn round_data(base: &[u8], i: u32) -> Vec<u8> {
    let mut data = base.to_vec();
    data.extend_from_slice(format!(" #{i}").as_bytes());
    data
}

/// Report every round `node` committed since the last drain.
fn drain(events: &mut mpsc::Receiver<CosiEvent>, start: Instant, ok: &mut u32, failed: &mut u32) {
    while let Ok(event) = events.try_recv() {
        if let CosiEvent::RoundCommitted(done) = event {
            let report = EventRound::new(&done, start.elapsed().as_secs_f64());
            if report.verified {
                *ok += 1;
            } else {
                *failed += 1;
            }
            emit(&report);
        }
    }
}

/// Run signing rounds at `node` (which must be root of its current view).
/// Events are drained as rounds finish so the node's buffer never fills.
async fn run_rounds(
    node: &Node<LocalHost>,
    events: &mut mpsc::Receiver<CosiEvent>,
    plan: &RoundPlan,
    start: Instant,
) -> (u32, u32) {
    let (mut ok, mut failed) = (0, 0);
    if plan.concurrent {
        let mut set = JoinSet::new();
        for i in 0..plan.rounds {
            let node = node.clone();
            let data = round_data(&plan.data, i);
            set.spawn(async move { node.start_round(data).await });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    emit(&EventFailed::new("round", e));
                }
                Err(e) => {
                    failed += 1;
                    emit(&EventFailed::new("round task", e));
                }
            }
            drain(events, start, &mut ok, &mut failed);
        }
    } else {
        for i in 0..plan.rounds {
            if let Err(e) = node.start_round(round_data(&plan.data, i)).await {
                failed += 1;
                emit(&EventFailed::new(&format!("round {}", i + 1), e));
            }
            drain(events, start, &mut ok, &mut failed);
        }
    }
    (ok, failed)
}

pub async fn sign(cluster: &mut LocalCluster, plan: &RoundPlan, start: Instant) -> anyhow::Result<(u32, u32)> {
    let root = cluster.root().clone();
    let mut events = cluster
        .take_events(root.name().as_str())
        .ok_or_else(|| anyhow!("root events already taken"))?;
    Ok(run_rounds(&root, &mut events, plan, start).await)
}

pub async fn view_change(
    cluster: &mut LocalCluster,
    proposer: &str,
    view: u64,
    plan: &RoundPlan,
    start: Instant,
) -> anyhow::Result<(u32, u32)> {
    let node = cluster
        .node(proposer)
        .ok_or_else(|| anyhow!("unknown host '{proposer}'"))?
        .clone();
    let mut events = cluster
        .take_events(proposer)
        .ok_or_else(|| anyhow!("events for '{proposer}' already taken"))?;

    let result = node.try_view_change(view).await;
    emit(&EventViewChange {
        event: "view_change",
        proposer: proposer.to_string(),
        view,
        accepted: result.is_ok(),
        elapsed_s: start.elapsed().as_secs_f64(),
    });
    if let Err(e) = result {
        emit(&EventFailed::new("view change", e));
        return Ok((0, 1));
    }

    tokio::time::sleep(PROPAGATION).await;
    let (ok, failed) = run_rounds(&node, &mut events, plan, start).await;
    Ok((ok + 1, failed))
}

pub struct VotePlan {
    pub add: Option<String>,
    pub remove: Option<String>,
    pub reject: Vec<String>,
}

pub async fn vote(
    cluster: &mut LocalCluster,
    vote: &VotePlan,
    plan: &RoundPlan,
    start: Instant,
) -> anyhow::Result<(u32, u32)> {
    let kind = match (&vote.add, &vote.remove) {
        (Some(add), None) => {
            let (name, parent) = parse_pair(add)?;
            cluster.join(&name, &parent).await?;
            let key = cluster
                .roster()
                .get(&NodeName::from(name.as_str()))
                .ok_or_else(|| anyhow!("no key for '{name}'"))?;
            GroupChangeKind::AddPeer {
                name: name.into(),
                parent: parent.into(),
                key,
            }
        }
        (None, Some(remove)) => GroupChangeKind::RemovePeer {
            name: remove.as_str().into(),
        },
        _ => bail!("vote needs exactly one of --add or --remove"),
    };

    for host in &vote.reject {
        let node = cluster
            .node(host)
            .ok_or_else(|| anyhow!("unknown host '{host}'"))?;
        node.set_vote_policy(Arc::new(|_: &GroupChangeKind| false))
            .await;
    }

    let root = cluster.root().clone();
    let mut events = cluster
        .take_events(root.name().as_str())
        .ok_or_else(|| anyhow!("root events already taken"))?;
    let hosts = root.transport().host_list(root.current_view().await).len();

    let outcome = root.propose_group_change(kind).await?;
    emit(&EventVote::new(&outcome, hosts));
    tokio::time::sleep(PROPAGATION).await;

    let (ok, failed) = run_rounds(&root, &mut events, plan, start).await;
    Ok((ok + u32::from(outcome.accepted), failed + u32::from(!outcome.accepted)))
}
