/// Integration test: adding and removing hosts by vote.
use std::sync::Arc;
use std::time::Duration;

use cosi_protocol::{
    CosiError, CosiEvent, GroupChangeKind, Keypair, LocalCluster, NodeConfig, NodeName, VoteOutcome,
};
use cosi_transport::LocalNetworkConfig;
use tokio::sync::mpsc;

fn tree() -> LocalCluster {
    LocalCluster::build(
        "root",
        &[("root", "A"), ("A", "B"), ("A", "C")],
        NodeConfig::new().deterministic_nonces(true),
        LocalNetworkConfig::new(),
    )
    .unwrap()
}

async fn group_changed(rx: &mut mpsc::Receiver<CosiEvent>, vote_id: u64) -> VoteOutcome {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Some(CosiEvent::GroupChanged(outcome)) if outcome.vote_id == vote_id => return outcome,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("vote outcome never arrived")
}

#[tokio::test(start_paused = true)]
async fn joined_host_signs_after_accepted_vote() {
    let mut cluster = tree();
    let mut root_events = cluster.take_events("root").unwrap();
    let mut b_events = cluster.take_events("B").unwrap();
    cluster.join("D", "B").await.unwrap();

    let key = Keypair::from_seed(b"D").public();
    let outcome = cluster
        .root()
        .propose_group_change(GroupChangeKind::AddPeer {
            name: "D".into(),
            parent: "B".into(),
            key,
        })
        .await
        .unwrap();
    assert!(outcome.accepted);
    assert_eq!(outcome.tally.accept, 4);

    let seen = group_changed(&mut b_events, outcome.vote_id).await;
    assert_eq!(seen, outcome);
    let b = cluster.node("B").unwrap();
    assert_eq!(b.transport().children(0), vec![NodeName::from("D")]);
    assert_eq!(b.roster().await.get(&"D".into()), Some(key));
    assert!(cluster.root().transport().host_list(0).contains(&"D".into()));

    cluster.root().start_round(b"with D".to_vec()).await.unwrap();
    let done = loop {
        if let Some(CosiEvent::RoundCommitted(done)) = root_events.recv().await {
            break done;
        }
    };
    assert!(done.signature.exceptions.is_empty());
    let names: Vec<NodeName> = ["root", "A", "B", "C", "D"].iter().map(|n| NodeName::from(*n)).collect();
    assert_eq!(done.agg_pubkey, cluster.roster().aggregate(&names));
    assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
}

#[tokio::test(start_paused = true)]
async fn removed_host_leaves_the_tree() {
    let mut cluster = tree();
    let mut root_events = cluster.take_events("root").unwrap();
    let mut a_events = cluster.take_events("A").unwrap();

    let outcome = cluster
        .root()
        .propose_group_change(GroupChangeKind::RemovePeer { name: "C".into() })
        .await
        .unwrap();
    assert!(outcome.accepted);
    group_changed(&mut a_events, outcome.vote_id).await;

    let a = cluster.node("A").unwrap();
    assert_eq!(a.transport().children(0), vec![NodeName::from("B")]);
    assert!(!a.roster().await.contains(&"C".into()));

    cluster.root().start_round(b"without C".to_vec()).await.unwrap();
    let done = loop {
        if let Some(CosiEvent::RoundCommitted(done)) = root_events.recv().await {
            break done;
        }
    };
    // C is gone rather than excepted.
    assert!(done.signature.exceptions.is_empty());
    let names: Vec<NodeName> = ["root", "A", "B"].iter().map(|n| NodeName::from(*n)).collect();
    assert_eq!(done.agg_pubkey, cluster.roster().aggregate(&names));
}

#[tokio::test(start_paused = true)]
async fn two_thirds_must_accept() {
    let cluster = tree();
    for name in ["B", "C"] {
        cluster
            .node(name)
            .unwrap()
            .set_vote_policy(Arc::new(|kind: &GroupChangeKind| {
                !matches!(kind, GroupChangeKind::RemovePeer { .. })
            }))
            .await;
    }

    let outcome = cluster
        .root()
        .propose_group_change(GroupChangeKind::RemovePeer { name: "C".into() })
        .await
        .unwrap();
    assert!(!outcome.accepted);
    assert_eq!((outcome.tally.accept, outcome.tally.reject), (2, 2));
    assert!(cluster.root().roster().await.contains(&"C".into()));
    assert!(cluster.node("A").unwrap().transport().children(0).contains(&"C".into()));
}

#[tokio::test(start_paused = true)]
async fn only_the_root_proposes() {
    let cluster = tree();
    let err = cluster
        .node("A")
        .unwrap()
        .propose_group_change(GroupChangeKind::RemovePeer { name: "B".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, CosiError::NotRoot { view: 0 }));
}

#[tokio::test(start_paused = true)]
async fn host_joins_in_the_current_view() {
    let mut cluster = tree();
    let a = cluster.node("A").unwrap().clone();
    let b = cluster.node("B").unwrap().clone();
    a.try_view_change(1).await.unwrap();
    for _ in 0..100 {
        if b.current_view().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(b.current_view().await, 1);

    let d = cluster.join("D", "B").await.unwrap().clone();
    assert_eq!(d.current_view().await, 1);
    assert!(!d.transport().has_view(0));
    assert_eq!(d.transport().parent(1), Some(NodeName::from("B")));
    let hosts = d.transport().host_list(1);
    assert!(hosts.contains(&"A".into()) && hosts.contains(&"D".into()));

    let mut a_events = cluster.take_events("A").unwrap();
    let mut b_events = cluster.take_events("B").unwrap();
    let key = Keypair::from_seed(b"D").public();
    let outcome = a
        .propose_group_change(GroupChangeKind::AddPeer {
            name: "D".into(),
            parent: "B".into(),
            key,
        })
        .await
        .unwrap();
    assert!(outcome.accepted);
    group_changed(&mut b_events, outcome.vote_id).await;
    assert_eq!(b.transport().children(1), vec![NodeName::from("D")]);

    a.start_round(b"D under B in view 1".to_vec()).await.unwrap();
    let done = loop {
        if let Some(CosiEvent::RoundCommitted(done)) = a_events.recv().await {
            break done;
        }
    };
    assert_eq!(done.view, 1);
    assert!(done.signature.exceptions.is_empty());
    let names: Vec<NodeName> = ["root", "A", "B", "C", "D"].iter().map(|n| NodeName::from(*n)).collect();
    assert_eq!(done.agg_pubkey, cluster.roster().aggregate(&names));
}
