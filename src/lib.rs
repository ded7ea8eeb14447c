#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # streamsource
//!
//! A partition-parallel, exactly-once event-processing engine layered over a
//! consumer-group client for an ordered, partitioned event log.
//!
//! ## What it does
//!
//! - **One logically ordered stream per partition**: each assigned partition
//!   gets its own worker (an intake pump plus a dispatch loop); within a
//!   partition events process strictly in fetch order, across partitions
//!   there is no ordering relationship.
//! - **State rebuilt before going live**: a partition-local state store is
//!   reconstructed from an auxiliary changelog and the worker blocks on an
//!   activation gate until that replay completes.
//! - **Exactly-once resume**: the resume point comes from a durable commit
//!   log, not broker-tracked consumer offsets; records at or below the last
//!   processed offset are dropped before they reach the application.
//! - **Cooperative teardown**: a revoked partition stops accepting intake
//!   immediately but lets outstanding transactional work settle through the
//!   producer pool before terminating.
//!
//! ## Collaborators
//!
//! The engine consumes its externals through traits and ships none of them:
//! [`client::ConsumerClient`] (polling), [`commit::CommitLog`] (durable
//! progress), [`producer::ProducerPool`] (gated, transactional production),
//! [`coordinator::ChangelogReplayer`] (store reconstruction), and optionally
//! [`client::IncrementalRebalancer`] (cooperative rebalancing).
//!
//! ## Sketch
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamsource::{
//!     ChangeLogRegistry, EngineConfig, CancelScope, ExecutionState, GroupCoordinator,
//! };
//!
//! let config = EngineConfig::new("billing", "orders", "orders-changelog");
//! let registry = Arc::new(ChangeLogRegistry::new(
//!     Arc::new(|_tp| OrderStore::default()),
//!     config.changelog_topic.clone(),
//! ));
//! let coordinator = Arc::new(GroupCoordinator::new(
//!     config,
//!     CancelScope::root(),
//!     client,       // your ConsumerClient
//!     commit_log,   // your CommitLog
//!     producers,    // your ProducerPool
//!     registry,
//!     replayer,     // your ChangelogReplayer
//!     Arc::new(|ctx: &_, record: &_| {
//!         // process one in-order event
//!         Ok(ExecutionState::Complete)
//!     }),
//! ));
//!
//! // membership callbacks: coordinator.partitions_assigned(...) etc.
//! coordinator.run().await?;
//! ```

pub mod cancel;
pub mod client;
pub mod commit;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod partition;
pub mod producer;
pub mod record;
pub mod store;
pub mod worker;

pub use cancel::CancelScope;
pub use client::{ConsumerClient, FetchBatch, IncrementalRebalancer, RebalanceProtocol};
pub use commit::CommitLog;
pub use config::EngineConfig;
pub use context::{EventContext, ExecutionState, ProducerRegistration};
pub use coordinator::{ActivationGate, ChangelogReplayer, GroupCoordinator, ReplayTask};
pub use error::{EngineError, Result};
pub use handler::EventHandler;
pub use partition::TopicPartition;
pub use producer::ProducerPool;
pub use record::{ConsumerRecord, Header};
pub use store::{ChangeLogPartition, ChangeLogRegistry, StateStore, StoreFactory, StoreHandle};
pub use worker::{AsyncCompleter, AsyncJob, InterjectionSpec, Interjector, PartitionWorker};
