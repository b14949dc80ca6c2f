//! CoSi protocol layer.
//!
//! Collective Schnorr signing over a tree of hosts: the root opens a
//! round, every host commits, the root derives one challenge over the
//! Merkle root of everything committed, and the aggregated responses form
//! a single signature that verifies under the sum of the participants'
//! public keys. Hosts that miss a phase are listed as exceptions.
//!
//! Also: view change (re-rooting the tree when the root goes silent) and
//! group-change votes (adding and removing hosts).
//!
//! Wire format: MessagePack (compact binary).
//! Crypto: Ristretto255 points + SHA-256 (Merkle and challenge).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cosi_protocol::{CosiEvent, LocalCluster, NodeConfig};
//! use cosi_transport::LocalNetworkConfig;
//!
//! # async fn example() -> Result<(), cosi_protocol::CosiError> {
//! let mut cluster = LocalCluster::build(
//!     "root",
//!     &[("root", "A"), ("A", "B"), ("A", "C")],
//!     NodeConfig::new(),
//!     LocalNetworkConfig::new(),
//! )?;
//! let round = cluster.root().start_round(b"Hello World".to_vec()).await?;
//! let mut events = cluster.take_events("root").unwrap();
//! while let Some(event) = events.recv().await {
//!     if let CosiEvent::RoundCommitted(done) = event {
//!         assert_eq!(done.round, round);
//!         assert!(done.signature.verify(&done.merkle_root, &done.agg_pubkey));
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod merkle;
pub mod message;
pub mod node;
pub mod roster;
pub mod round;
pub mod signature;
pub mod suite;
pub mod transport;
pub mod types;

pub use config::NodeConfig;
pub use error::CosiError;
pub use events::{CosiEvent, RoundDone, RoundSummary};
pub use local::LocalCluster;
pub use merkle::{HashId, Proof};
pub use message::{
    Envelope, GroupChangeKind, MessageType, Payload, VoteOutcome, VoteRequest, VoteTally,
};
pub use node::{designated_root, quorum_threshold, AcceptAll, FailurePlan, Node, VotePolicy};
pub use roster::Roster;
pub use signature::CollectiveSignature;
pub use suite::{Keypair, Point, PublicKey, Secret};
pub use transport::Transport;
pub use types::{NodeName, Phase, RoundNumber, ViewNumber};
