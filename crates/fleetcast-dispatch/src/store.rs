//! Persistence seam for jobs and audit records.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::model::{AuditRecord, DistributionJob, JobId};

/// External storage for jobs and their audit trail.
///
/// Calls are short and synchronous; the tracker invokes them while holding
/// a job's lock so that snapshots reach the store in transition order.
pub trait JobStore: Send + Sync {
    fn get_job(&self, id: &JobId) -> Result<DistributionJob, StoreError>;

    fn insert_job(&self, job: &DistributionJob) -> Result<(), StoreError>;

    fn update_job(&self, job: &DistributionJob) -> Result<(), StoreError>;

    fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError>;

    fn update_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError>;
}

/// In-memory job store.
///
/// Data is lost when the process exits; used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs:  RwLock<HashMap<JobId, DistributionJob>>,
    audit: RwLock<Vec<AuditRecord>>,
}

fn poisoned<T>(_: T) -> StoreError { StoreError::Backend("lock poisoned".into()) }

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Audit records of one job in insertion order.
    pub fn audit_records(&self, job_id: &JobId) -> Result<Vec<AuditRecord>, StoreError> {
        let audit = self.audit.read().map_err(poisoned)?;
        Ok(audit.iter().filter(|r| &r.job_id == job_id).cloned().collect())
    }

    pub fn job_ids(&self) -> Result<Vec<JobId>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut ids: Vec<_> = jobs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl JobStore for MemoryStore {
    fn get_job(&self, id: &JobId) -> Result<DistributionJob, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    fn insert_job(&self, job: &DistributionJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Backend(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn update_job(&self, job: &DistributionJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let slot = jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job.id)))?;
        *slot = job.clone();
        Ok(())
    }

    fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut audit = self.audit.write().map_err(poisoned)?;
        audit.push(record.clone());
        Ok(())
    }

    fn update_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut audit = self.audit.write().map_err(poisoned)?;
        let slot = audit
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StoreError::NotFound(format!("audit record {}", record.id)))?;
        *slot = record.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Status, TargetKey};

    fn job() -> DistributionJob {
        DistributionJob::builder("job-1")
            .target(TargetKey::new("a", "app"))
            .workspace_id("ws-1")
            .build()
    }

    #[test]
    fn test_job_roundtrip() {
        let store = MemoryStore::new();
        let mut job = job();
        store.insert_job(&job).unwrap();
        assert!(store.insert_job(&job).is_err());

        job.targets[0].status = Status::Ok;
        store.update_job(&job).unwrap();
        assert_eq!(store.get_job(&job.id).unwrap().targets[0].status, Status::Ok);
        assert_eq!(store.job_ids().unwrap(), vec![job.id.clone()]);
    }

    #[test]
    fn test_missing_job() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_job(&JobId::new("nope")), Err(StoreError::NotFound(_))));
        assert!(store.update_job(&job()).is_err());
    }

    #[test]
    fn test_audit_update_replaces_record() {
        let store = MemoryStore::new();
        let job = job();
        let mut record = AuditRecord::open(&job, &job.targets[0].key, Status::InProgress, None, None);
        store.insert_audit_record(&record).unwrap();

        record.close(Status::Ok, Some("ok".into()));
        store.update_audit_record(&record).unwrap();

        let records = store.audit_records(&job.id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_closed());
        assert_eq!(records[0].workspace_id.as_deref(), Some("ws-1"));
    }
}
