//! Serialized status transitions and the audit trail.
//!
//! Every transition of a job goes through that job's mutex, taken from a
//! registry keyed by job id. Inside the lock the target is updated, the
//! aggregate is recomputed from all targets, the snapshot is persisted and
//! the audit record is opened or closed. Store failures never abort a
//! transition: they are logged and counted, and the in-memory state stays
//! authoritative for the rest of the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result, StoreError};
use crate::model::{AggregateStatus, AuditRecord, DistributionJob, JobId, Status, TargetKey};
use crate::store::JobStore;

/// Outcome of [`StatusTracker::record_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { aggregate: AggregateStatus },
    /// The target was already terminal, or already in the requested state.
    Ignored { current: Status },
}

impl Transition {
    pub fn is_applied(&self) -> bool { matches!(self, Self::Applied { .. }) }
}

enum Rule {
    Apply,
    Ignore,
    Reject,
}

fn rule(from: Status, to: Status) -> Rule {
    use Status::*;
    match (from, to) {
        (f, _) if f.is_terminal() => Rule::Ignore,
        (f, t) if f == t => Rule::Ignore,
        (Waiting, InProgress) | (Waiting, Cancelled) => Rule::Apply,
        (InProgress, Ok) | (InProgress, Fail) => Rule::Apply,
        _ => Rule::Reject,
    }
}

struct JobState {
    job:  DistributionJob,
    /// Open audit record per target index.
    open: HashMap<usize, AuditRecord>,
}

pub struct StatusTracker<S> {
    store:           Arc<S>,
    jobs:            Mutex<HashMap<JobId, Arc<Mutex<JobState>>>>,
    inconsistencies: AtomicU64,
}

impl<S: JobStore> StatusTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            jobs: Mutex::new(HashMap::new()),
            inconsistencies: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> { &self.store }

    /// Start tracking a job and return its tracked view.
    ///
    /// A job that is already tracked keeps its in-memory state; otherwise
    /// it is read from the store.
    pub fn track(&self, job_id: &JobId) -> Result<DistributionJob> {
        let state = self.state(job_id)?;
        let job = state.lock().unwrap_or_else(PoisonError::into_inner).job.clone();
        Ok(job)
    }

    /// Drop the in-memory state of a finished job.
    pub fn release(&self, job_id: &JobId) { self.registry().remove(job_id); }

    pub fn is_loaded(&self, job_id: &JobId) -> bool { self.registry().contains_key(job_id) }

    /// Number of store writes that failed since creation.
    pub fn inconsistencies(&self) -> u64 { self.inconsistencies.load(Ordering::Relaxed) }

    /// Current view of a job: in-memory if tracked, otherwise from the store.
    pub fn snapshot(&self, job_id: &JobId) -> Result<DistributionJob> {
        let tracked = self.registry().get(job_id).cloned();
        match tracked {
            Some(state) => Ok(state.lock().unwrap_or_else(PoisonError::into_inner).job.clone()),
            None => self.fetch(job_id),
        }
    }

    pub fn record_transition(
        &self,
        job_id: &JobId,
        target: &TargetKey,
        status: Status,
        result: Option<String>,
        principal: Option<&str>,
    ) -> Result<Transition> {
        let state = self.state(job_id)?;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let index = state
            .job
            .targets
            .iter()
            .position(|t| t.key.matches(target))
            .ok_or_else(|| DispatchError::UnknownTarget {
                job:    job_id.clone(),
                target: target.clone(),
            })?;
        self.apply(&mut state, index, status, result, principal)
    }

    /// Move every still-waiting target of a job to `Cancelled`.
    pub fn cancel_waiting(&self, job_id: &JobId, principal: Option<&str>) -> Result<Vec<TargetKey>> {
        let state = self.state(job_id)?;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

        let waiting: Vec<usize> = (0..state.job.targets.len())
            .filter(|&i| state.job.targets[i].status == Status::Waiting)
            .collect();

        let mut cancelled = Vec::with_capacity(waiting.len());
        for index in waiting {
            let result = Some("cancelled before start".to_string());
            if self.apply(&mut state, index, Status::Cancelled, result, principal)?.is_applied() {
                cancelled.push(state.job.targets[index].key.clone());
            }
        }
        Ok(cancelled)
    }

    fn apply(
        &self,
        state: &mut JobState,
        index: usize,
        status: Status,
        result: Option<String>,
        principal: Option<&str>,
    ) -> Result<Transition> {
        let link = &state.job.targets[index];
        let from = link.status;
        match rule(from, status) {
            Rule::Ignore => {
                debug!(job_id = %state.job.id, key = %link.key, %from, to = %status, "transition ignored");
                return Ok(Transition::Ignored { current: from });
            }
            Rule::Reject => {
                return Err(DispatchError::InvalidTransition {
                    target: link.key.clone(),
                    from,
                    to: status,
                });
            }
            Rule::Apply => {}
        }

        let link = &mut state.job.targets[index];
        link.status = status;
        link.result = result.clone();
        link.last_attempt_at = Some(Utc::now());
        let key = link.key.clone();
        let aggregate = state.job.refresh_status();

        let principal = principal.map(str::to_owned).or_else(|| state.job.principal.clone());
        if let Err(error) = self.store.update_job(&state.job) {
            self.inconsistent(&state.job.id, "update_job", &error);
        }

        if from == Status::Waiting {
            let mut record = AuditRecord::open(&state.job, &key, status, result, principal);
            if status.is_terminal() {
                record.ended_at = Some(record.started_at);
            }
            if let Err(error) = self.store.insert_audit_record(&record) {
                self.inconsistent(&state.job.id, "insert_audit_record", &error);
            }
            if !status.is_terminal() {
                state.open.insert(index, record);
            }
        } else {
            let mut record = match state.open.remove(&index) {
                Some(record) => record,
                None => {
                    // Opened by an earlier process; start a fresh record for this attempt.
                    let record =
                        AuditRecord::open(&state.job, &key, Status::InProgress, None, principal);
                    if let Err(error) = self.store.insert_audit_record(&record) {
                        self.inconsistent(&state.job.id, "insert_audit_record", &error);
                    }
                    record
                }
            };
            record.close(status, result);
            if let Err(error) = self.store.update_audit_record(&record) {
                self.inconsistent(&state.job.id, "update_audit_record", &error);
            }
        }

        debug!(job_id = %state.job.id, key = %key, %from, to = %status, %aggregate, "transition applied");
        Ok(Transition::Applied { aggregate })
    }

    fn inconsistent(&self, job_id: &JobId, operation: &str, error: &StoreError) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
        warn!(%job_id, operation, %error, "store write failed, continuing with in-memory state");
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Arc<Mutex<JobState>>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock entry of a job, loading it from the store on first use.
    ///
    /// The store is read without holding the registry lock. When two callers
    /// race on first use, the entry inserted first wins and both share it.
    fn state(&self, job_id: &JobId) -> Result<Arc<Mutex<JobState>>> {
        if let Some(state) = self.registry().get(job_id) {
            return Ok(Arc::clone(state));
        }
        let job = self.fetch(job_id)?;
        let mut jobs = self.registry();
        let state = jobs.entry(job_id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(JobState {
                job,
                open: HashMap::new(),
            }))
        });
        Ok(Arc::clone(state))
    }

    fn fetch(&self, job_id: &JobId) -> Result<DistributionJob> {
        self.store.get_job(job_id).map_err(|e| match e {
            StoreError::NotFound(_) => DispatchError::JobNotFound(job_id.clone()),
            other => DispatchError::Store(other),
        })
    }
}
