//! One delivery of one artifact to one target.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use fleetcast_transfer::{ChunkTransfer, chunk_count};
use indicatif::HumanBytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentReply, AgentSink, ChunkManifest, DeliveryRequest, Payload, TargetAgent};
use crate::artifact::Artifact;
use crate::config::DispatchConfig;
use crate::error::DeliveryError;
use crate::model::{JobId, Status, TargetKey};
use crate::store::JobStore;
use crate::tracker::{StatusTracker, Transition};

/// Result payload stored on the target link and in the audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub code:             u16,
    pub msg:              String,
    pub upload_duration:  String,
    pub upload_file_size: String,
}

/// How one delivery ended.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub target:  TargetKey,
    pub status:  Status,
    pub code:    u16,
    pub msg:     String,
    pub elapsed: Duration,
    pub size:    u64,
    pub chunked: bool,
}

impl DeliveryOutcome {
    pub fn payload(&self) -> ResultPayload {
        ResultPayload {
            code:             self.code,
            msg:              self.msg.clone(),
            upload_duration:  format!("{:.1?}", self.elapsed),
            upload_file_size: HumanBytes(self.size).to_string(),
        }
    }

    pub fn payload_json(&self) -> String {
        serde_json::to_string(&self.payload()).unwrap_or_else(|_| self.msg.clone())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Delivers the artifact to a single target and reports the result.
///
/// The task never leaves its target in progress: transfer errors, agent
/// rejections, deadline overruns and panics all end in `Fail`.
pub struct DeliveryTask<S, A> {
    pub(crate) tracker:   Arc<StatusTracker<S>>,
    pub(crate) agent:     Arc<A>,
    pub(crate) config:    Arc<DispatchConfig>,
    pub(crate) artifact:  Arc<Artifact>,
    pub(crate) request:   Arc<DeliveryRequest>,
    pub(crate) job_id:    JobId,
    pub(crate) target:    TargetKey,
    pub(crate) principal: Option<String>,
}

impl<S: JobStore, A: TargetAgent> DeliveryTask<S, A> {
    /// Run the delivery. Returns `None` when the target was no longer
    /// waiting (for example cancelled) and nothing was done.
    pub async fn run(self) -> Option<DeliveryOutcome> {
        match self.tracker.record_transition(
            &self.job_id,
            &self.target,
            Status::InProgress,
            Some("delivery started".to_string()),
            self.principal.as_deref(),
        ) {
            Ok(Transition::Applied { .. }) => {}
            Ok(Transition::Ignored { current }) => {
                debug!(job_id = %self.job_id, key = %self.target, %current, "target not waiting, skipping");
                return None;
            }
            Err(error) => {
                warn!(job_id = %self.job_id, key = %self.target, %error, "could not start delivery");
                return None;
            }
        }

        let start = Instant::now();
        let chunked = self.config.is_chunked(self.artifact.len);
        let session = Uuid::new_v4().simple().to_string();

        let work = AssertUnwindSafe(self.transfer(chunked, &session)).catch_unwind();
        let result = match self.config.delivery_timeout() {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(DeliveryError::Timeout(limit))),
            },
            None => work.await,
        };
        let result = result.unwrap_or_else(|panic| Err(DeliveryError::Panicked(panic_message(&*panic))));

        if result.is_err() && chunked {
            self.agent.abort(&self.target, &session).await;
        }

        let (status, code, msg) = match result {
            Ok(reply) => (Status::Ok, reply.code, reply.msg),
            Err(error) => (Status::Fail, error.code(), error.to_string()),
        };
        let outcome = DeliveryOutcome {
            target: self.target.clone(),
            status,
            code,
            msg,
            elapsed: start.elapsed(),
            size: self.artifact.len,
            chunked,
        };

        match status {
            Status::Ok => info!(
                job_id = %self.job_id,
                key = %self.target,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                bytes = outcome.size,
                chunked,
                "delivery succeeded"
            ),
            _ => warn!(
                job_id = %self.job_id,
                key = %self.target,
                code,
                msg = %outcome.msg,
                "delivery failed"
            ),
        }

        if let Err(error) = self.tracker.record_transition(
            &self.job_id,
            &self.target,
            status,
            Some(outcome.payload_json()),
            self.principal.as_deref(),
        ) {
            warn!(job_id = %self.job_id, key = %self.target, %error, "could not record delivery result");
        }

        Some(outcome)
    }

    async fn transfer(&self, chunked: bool, session: &str) -> Result<AgentReply, DeliveryError> {
        let reply = if chunked {
            let manifest = ChunkManifest {
                session:     session.to_string(),
                file_name:   self.artifact.file_name.clone(),
                file_len:    self.artifact.len,
                chunk_size:  self.config.chunk_size,
                chunk_count: chunk_count(self.artifact.len, self.config.chunk_size)?,
                digest:      self.artifact.digest.clone(),
            };
            let sink = Arc::new(AgentSink::new(
                Arc::clone(&self.agent),
                self.target.clone(),
                manifest.clone(),
            ));
            ChunkTransfer::new(&self.artifact.path, self.config.transfer_options())
                .run(sink)
                .await?;
            self.agent
                .deliver(&self.target, &self.request, Payload::Chunked(manifest))
                .await?
        } else {
            let payload = Payload::Whole {
                path:      self.artifact.path.clone(),
                file_name: self.artifact.file_name.clone(),
                digest:    self.artifact.digest.clone(),
            };
            self.agent.deliver(&self.target, &self.request, payload).await?
        };

        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(DeliveryError::Rejected {
                code: reply.code,
                msg:  reply.msg,
            })
        }
    }
}
