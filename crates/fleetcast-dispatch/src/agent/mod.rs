//! Contract with the receiving side of a delivery.

mod local;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use fleetcast_transfer::{ChunkDescriptor, ChunkSink};
use serde::{Deserialize, Serialize};

pub use local::{ActionKind, AgentAction, LocalAgent, RELEASE_MARKER};

use crate::error::AgentError;
use crate::model::{AfterAction, DistributionJob, JobId, TargetKey};

/// Reply code for a successful delivery.
pub const REPLY_OK: u16 = 200;

/// Everything a target needs to rebuild and verify a chunked artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Private to one (job, target, attempt).
    pub session:     String,
    pub file_name:   String,
    pub file_len:    u64,
    pub chunk_size:  u64,
    pub chunk_count: u32,
    /// Hex SHA-256 of the source artifact.
    pub digest:      String,
}

/// Per-job instructions that travel with every delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub job_id:             JobId,
    pub unpack:             bool,
    pub clear_old:          bool,
    pub stop_before_upload: bool,
    pub sub_path:           Option<String>,
    pub after_action:       AfterAction,
}

impl DeliveryRequest {
    pub fn from_job(job: &DistributionJob) -> Self {
        Self {
            job_id:             job.id.clone(),
            unpack:             job.unpack,
            clear_old:          job.clear_old,
            stop_before_upload: job.stop_before_upload,
            sub_path:           job.sub_path.clone(),
            after_action:       job.after_action,
        }
    }
}

/// What is being delivered.
#[derive(Debug, Clone)]
pub enum Payload {
    /// The whole artifact in one piece.
    Whole { path: PathBuf, file_name: String, digest: String },
    /// A chunk session whose chunks were all sent with `put_chunk`.
    Chunked(ChunkManifest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub code: u16,
    pub msg:  String,
}

impl AgentReply {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: REPLY_OK,
            msg:  msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool { self.code == REPLY_OK }
}

/// Reliable request/response delivery to one target.
///
/// Implementations own transport, staging and post-delivery actions on the
/// target side. Calls for different targets may run concurrently.
pub trait TargetAgent: Send + Sync + 'static {
    /// Stage one chunk of a session.
    fn put_chunk(
        &self,
        target: &TargetKey,
        manifest: &ChunkManifest,
        chunk: &ChunkDescriptor,
        data: Bytes,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;

    /// Place the artifact and run the requested actions.
    fn deliver(
        &self,
        target: &TargetKey,
        request: &DeliveryRequest,
        payload: Payload,
    ) -> impl Future<Output = Result<AgentReply, AgentError>> + Send;

    /// Discard whatever was staged for `session`. Must be idempotent.
    fn abort(&self, target: &TargetKey, session: &str) -> impl Future<Output = ()> + Send;
}

/// Adapts a [`TargetAgent`] into a chunk sink for one session.
pub struct AgentSink<A> {
    agent:    Arc<A>,
    target:   TargetKey,
    manifest: ChunkManifest,
}

impl<A: TargetAgent> AgentSink<A> {
    pub fn new(agent: Arc<A>, target: TargetKey, manifest: ChunkManifest) -> Self {
        Self {
            agent,
            target,
            manifest,
        }
    }
}

impl<A: TargetAgent> ChunkSink for AgentSink<A> {
    type Error = AgentError;

    async fn write_chunk(&self, chunk: &ChunkDescriptor, data: Bytes) -> Result<(), AgentError> {
        self.agent.put_chunk(&self.target, &self.manifest, chunk, data).await
    }
}
