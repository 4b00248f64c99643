//! Distribution of one artifact to many targets with per-target status
//! tracking.
//!
//! A [`Dispatcher`] loads a [`DistributionJob`] from a [`JobStore`], inspects
//! the artifact and fans out one delivery per target over a bounded pool.
//! Large artifacts travel as chunks through `fleetcast-transfer` and are
//! rebuilt and verified by the [`TargetAgent`] before placement. Every status
//! change goes through the [`StatusTracker`], which serializes transitions per
//! job, keeps the aggregate consistent and writes the audit trail.
//!
//! # Key Features
//!
//! - **Bounded Fan-Out**: a semaphore caps deliveries in flight per job, with optional throttling
//! - **Cooperative Cancel**: waiting targets are cancelled at once, running ones finish
//! - **Failure Isolation**: errors, timeouts and panics become a `Fail` for that target only
//! - **Store Tolerant**: store write failures are logged and counted, never fatal

mod agent;
mod artifact;
mod config;
mod coordinator;
mod delivery;
mod error;
mod model;
mod store;
mod tracker;

pub use agent::{
    ActionKind, AgentAction, AgentReply, AgentSink, ChunkManifest, DeliveryRequest, LocalAgent, Payload,
    REPLY_OK, RELEASE_MARKER, TargetAgent,
};
pub use artifact::Artifact;
pub use config::{DispatchConfig, parse_size};
pub use coordinator::{Dispatcher, JobHandle, JobSummary};
pub use delivery::{DeliveryOutcome, ResultPayload};
pub use error::{AgentError, DeliveryError, DispatchError, Result, StoreError};
pub use model::{
    AfterAction, AggregateStatus, AuditRecord, DistributionJob, DistributionJobBuilder, JobId,
    ParseTargetError, Status, TargetKey, TargetLink,
};
pub use store::{JobStore, MemoryStore};
pub use tracker::{StatusTracker, Transition};
