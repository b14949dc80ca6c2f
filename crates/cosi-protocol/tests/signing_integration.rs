/// Integration test: signing rounds over the in-process network.
///
/// Tree used throughout:
///
///   root
///    └─ A
///       ├─ B
///       └─ C
use std::time::Duration;

use cosi_protocol::message::AnnouncementPayload;
use cosi_protocol::{
    CosiError, CosiEvent, FailurePlan, LocalCluster, NodeConfig, NodeName, Phase, RoundDone,
};
use cosi_transport::LocalNetworkConfig;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn tree() -> LocalCluster {
    init_tracing();
    LocalCluster::build(
        "root",
        &[("root", "A"), ("A", "B"), ("A", "C")],
        NodeConfig::new().deterministic_nonces(true),
        LocalNetworkConfig::new(),
    )
    .unwrap()
}

async fn committed(rx: &mut mpsc::Receiver<CosiEvent>, round: u64) -> RoundDone {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Some(CosiEvent::RoundCommitted(done)) if done.round == round => return done,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("round never committed")
}

fn key_sum(cluster: &LocalCluster, names: &[&str]) -> cosi_protocol::Point {
    let names: Vec<NodeName> = names.iter().map(|n| NodeName::from(*n)).collect();
    cluster.roster().aggregate(&names)
}

#[tokio::test(start_paused = true)]
async fn healthy_tree_signs_under_every_key() {
    let mut cluster = tree();
    let mut events = cluster.take_events("root").unwrap();
    let mut b_events = cluster.take_events("B").unwrap();

    let round = cluster
        .root()
        .start_round(b"Hello World".to_vec())
        .await
        .unwrap();
    assert_eq!(round, 1);

    let done = committed(&mut events, round).await;
    assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
    assert!(done.signature.exceptions.is_empty());
    assert_eq!(done.agg_pubkey, key_sum(&cluster, &["root", "A", "B", "C"]));
    assert!(done.proof.check(&done.merkle_root, &done.log_hash));

    // A leaf saw the same global root in its inclusion proof.
    let mut proof_root = None;
    let mut verified = false;
    while let Ok(event) = b_events.try_recv() {
        match event {
            CosiEvent::ProofReady {
                merkle_root,
                local_root,
                proof,
                ..
            } => {
                assert!(proof.check(&merkle_root, &local_root));
                proof_root = Some(merkle_root);
            }
            CosiEvent::RoundVerified(summary) => verified = summary.round == round,
            _ => {}
        }
    }
    assert_eq!(proof_root, Some(done.merkle_root));
    assert!(verified);
}

#[tokio::test(start_paused = true)]
async fn submitted_items_are_provably_included() {
    let mut cluster = tree();
    let mut c_events = cluster.take_events("C").unwrap();
    let mut events = cluster.take_events("root").unwrap();
    cluster.node("C").unwrap().submit(b"tx-1".to_vec()).await;
    cluster.node("C").unwrap().submit(b"tx-2".to_vec()).await;

    let round = cluster.root().start_round(b"batch".to_vec()).await.unwrap();
    let done = committed(&mut events, round).await;

    let mut items = Vec::new();
    while let Ok(event) = c_events.try_recv() {
        if let CosiEvent::ProofReady { items: got, .. } = event {
            items = got;
        }
    }
    assert_eq!(items.len(), 2);
    for (leaf, proof) in &items {
        assert!(proof.check(&done.merkle_root, leaf));
    }
    let tx1 = cosi_protocol::merkle::hash_bytes(b"tx-1");
    assert!(items.iter().any(|(leaf, _)| *leaf == tx1));
}

#[tokio::test(start_paused = true)]
async fn silent_commit_is_excepted() {
    let mut cluster = tree();
    let mut events = cluster.take_events("root").unwrap();
    cluster
        .node("C")
        .unwrap()
        .set_failures(FailurePlan::new().dead(Phase::Commit))
        .await;

    let round = cluster.root().start_round(b"Hello World".to_vec()).await.unwrap();
    let done = committed(&mut events, round).await;

    let c_key = cluster.roster().get(&"C".into()).unwrap();
    assert_eq!(done.signature.exceptions, vec![c_key]);
    assert_eq!(done.agg_pubkey, key_sum(&cluster, &["root", "A", "B"]));
    assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
}

#[tokio::test(start_paused = true)]
async fn silent_response_is_excepted_once() {
    let mut cluster = tree();
    let mut events = cluster.take_events("root").unwrap();
    cluster
        .node("C")
        .unwrap()
        .set_failures(FailurePlan::new().dead(Phase::Response))
        .await;

    let round = cluster.root().start_round(b"Hello World".to_vec()).await.unwrap();
    let done = committed(&mut events, round).await;

    let c_key = cluster.roster().get(&"C".into()).unwrap();
    assert_eq!(done.signature.exceptions, vec![c_key]);
    assert_eq!(done.agg_pubkey, key_sum(&cluster, &["root", "A", "B"]));
    assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
    // Without the excepted commitment the signature no longer checks.
    let mut stripped = done.signature.clone();
    stripped.exception_commit = cosi_protocol::suite::Accumulator::new().value();
    assert!(!stripped.verify(&done.merkle_root, &done.agg_pubkey));
}

#[tokio::test(start_paused = true)]
async fn silent_interior_node_drops_its_subtree() {
    let mut cluster = tree();
    let mut events = cluster.take_events("root").unwrap();
    cluster
        .node("A")
        .unwrap()
        .set_failures(FailurePlan::new().dead(Phase::Commit))
        .await;

    let round = cluster.root().start_round(b"Hello World".to_vec()).await.unwrap();
    let done = committed(&mut events, round).await;

    assert_eq!(done.agg_pubkey, key_sum(&cluster, &["root"]));
    assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
}

#[tokio::test(start_paused = true)]
async fn corrupt_response_aborts_the_round() {
    let cluster = tree();
    cluster
        .node("C")
        .unwrap()
        .set_failures(FailurePlan::new().corrupt_response())
        .await;

    let err = cluster
        .root()
        .start_round(b"Hello World".to_vec())
        .await
        .unwrap_err();
    assert!(
        matches!(&err, CosiError::ChildFailed { round: 1, child, .. } if child.as_str() == "A"),
        "unexpected error: {err}"
    );
    assert_eq!(cluster.root().outstanding_rounds().await, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_rounds_get_distinct_numbers() {
    let mut cluster = tree();
    let mut events = cluster.take_events("root").unwrap();
    let root = cluster.root().clone();

    let (one, two) = tokio::join!(
        root.start_round(b"one".to_vec()),
        root.start_round(b"two".to_vec())
    );
    let (one, two) = (one.unwrap(), two.unwrap());
    assert_ne!(one, two);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CosiEvent::RoundCommitted(done) = event {
            assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
            seen.push(done.round);
        }
    }
    seen.sort();
    assert_eq!(seen, vec![one.min(two), one.max(two)]);
}

#[tokio::test(start_paused = true)]
async fn round_numbers_only_move_forward() {
    let cluster = tree();
    let root = cluster.root();
    for expected in 1..=3 {
        assert_eq!(root.start_round(vec![expected as u8]).await.unwrap(), expected);
    }
    assert_eq!(root.last_seen_round().await, 3);

    let err = root
        .announce(
            0,
            AnnouncementPayload {
                round: 2,
                data: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CosiError::PastRound {
            round: 2,
            last_seen: 3
        }
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cluster.node("B").unwrap().last_seen_round().await, 3);
}
