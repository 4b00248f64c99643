//! Job execution: validation, bounded fan-out and cancellation.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::agent::{DeliveryRequest, TargetAgent};
use crate::artifact::Artifact;
use crate::config::DispatchConfig;
use crate::delivery::{DeliveryOutcome, DeliveryTask};
use crate::error::{DispatchError, Result};
use crate::model::{AggregateStatus, DistributionJob, JobId, Status, TargetKey, TargetLink};
use crate::store::JobStore;
use crate::tracker::StatusTracker;

/// Final state of a job once its driver has finished.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id:    JobId,
    pub aggregate: AggregateStatus,
    pub targets:   Vec<TargetLink>,
    /// Outcomes of the deliveries that actually ran, in completion order.
    pub outcomes:  Vec<DeliveryOutcome>,
    pub elapsed:   Duration,
}

impl JobSummary {
    pub fn count(&self, status: Status) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    pub fn status_of(&self, key: &TargetKey) -> Option<Status> {
        self.targets.iter().find(|t| t.key.matches(key)).map(|t| t.status)
    }
}

/// State shared between the dispatcher, its drivers and job handles.
struct Control<S> {
    tracker: Arc<StatusTracker<S>>,
    running: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl<S: JobStore> Control<S> {
    fn running(&self) -> MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the job's cancel flag and cancel its waiting targets.
    ///
    /// Runs under the running-map lock so a driver cannot release the job
    /// between the two steps. `principal` is recorded on the cancelled
    /// targets' audit records; `None` falls back to the job's principal.
    fn cancel(&self, job_id: &JobId, principal: Option<&str>) -> Result<Vec<TargetKey>> {
        let running = self.running();
        if let Some(flag) = running.get(job_id) {
            flag.send_replace(true);
        }
        let was_loaded = self.tracker.is_loaded(job_id);
        let cancelled = self.tracker.cancel_waiting(job_id, principal);
        if !was_loaded {
            self.tracker.release(job_id);
        }
        let cancelled = cancelled?;
        drop(running);

        info!(%job_id, cancelled = cancelled.len(), principal, "job cancelled");
        Ok(cancelled)
    }

    /// Claim the job for a new driver.
    fn claim(&self, job_id: &JobId) -> Result<watch::Receiver<bool>> {
        let mut running = self.running();
        if running.contains_key(job_id) {
            return Err(DispatchError::AlreadyRunning(job_id.clone()));
        }
        let (flag, cancel_rx) = watch::channel(false);
        running.insert(job_id.clone(), flag);
        Ok(cancel_rx)
    }

    /// Start tracking a claimed job.
    ///
    /// Takes the running-map lock, so a cancel issued while the job was
    /// being prepared is already part of the state read here.
    fn track(&self, job_id: &JobId) -> Result<DistributionJob> {
        let _running = self.running();
        self.tracker.track(job_id)
    }

    /// Give up a claim that never got a driver.
    fn abandon(&self, job_id: &JobId) { self.running().remove(job_id); }

    fn finish(&self, job_id: &JobId) {
        let mut running = self.running();
        running.remove(job_id);
        self.tracker.release(job_id);
    }
}

/// Runs distribution jobs against a store and a target agent.
pub struct Dispatcher<S, A> {
    control: Arc<Control<S>>,
    agent:   Arc<A>,
    config:  Arc<DispatchConfig>,
}

impl<S, A> Dispatcher<S, A>
where
    S: JobStore + 'static,
    A: TargetAgent,
{
    pub fn new(store: Arc<S>, agent: Arc<A>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            control: Arc::new(Control {
                tracker: Arc::new(StatusTracker::new(store)),
                running: Mutex::new(HashMap::new()),
            }),
            agent,
            config: Arc::new(config),
        })
    }

    pub fn tracker(&self) -> &Arc<StatusTracker<S>> { &self.control.tracker }

    pub fn config(&self) -> &DispatchConfig { &self.config }

    pub fn is_running(&self, job_id: &JobId) -> bool { self.control.running().contains_key(job_id) }

    /// Validate a stored job and start delivering `artifact` to its targets.
    ///
    /// Validation errors are returned before any delivery is scheduled. The
    /// job counts as running from the first check on, so a cancel that
    /// arrives while the artifact is still being inspected is honoured.
    pub async fn start(&self, job_id: &JobId, artifact: impl AsRef<Path>) -> Result<JobHandle<S>> {
        let cancel_rx = self.control.claim(job_id)?;
        let (job, artifact) = match self.prepare(job_id, artifact.as_ref()).await {
            Ok(prepared) => prepared,
            Err(error) => {
                self.control.abandon(job_id);
                return Err(error);
            }
        };

        info!(
            %job_id,
            targets = job.targets.len(),
            artifact = %artifact.file_name,
            bytes = artifact.len,
            chunked = self.config.is_chunked(artifact.len),
            cancelled = *cancel_rx.borrow(),
            "job started"
        );

        let driver = Driver {
            control:  Arc::clone(&self.control),
            agent:    Arc::clone(&self.agent),
            config:   Arc::clone(&self.config),
            request:  Arc::new(DeliveryRequest::from_job(&job)),
            artifact,
            job,
        };
        let task = tokio::spawn(driver.run(cancel_rx));

        Ok(JobHandle {
            job_id:  job_id.clone(),
            control: Arc::clone(&self.control),
            task,
        })
    }

    async fn prepare(&self, job_id: &JobId, artifact: &Path) -> Result<(DistributionJob, Arc<Artifact>)> {
        validate_targets(&self.control.tracker.snapshot(job_id)?)?;
        let artifact = Arc::new(Artifact::inspect(artifact).await?);
        let job = self.control.track(job_id)?;
        Ok((job, artifact))
    }

    /// Cancel a job: waiting targets become `Cancelled` immediately and no
    /// new delivery starts. Running deliveries finish on their own.
    pub fn cancel(&self, job_id: &JobId, principal: Option<&str>) -> Result<Vec<TargetKey>> {
        self.control.cancel(job_id, principal)
    }

    /// Create and store a new job covering only the failed targets of a
    /// finished job.
    pub fn resubmit_failed(&self, job_id: &JobId, new_job_id: impl Into<JobId>) -> Result<DistributionJob> {
        if self.is_running(job_id) {
            return Err(DispatchError::AlreadyRunning(job_id.clone()));
        }
        let old = self.control.tracker.snapshot(job_id)?;
        let failed: Vec<TargetKey> = old
            .targets
            .iter()
            .filter(|t| t.status == Status::Fail)
            .map(|t| t.key.clone())
            .collect();
        if failed.is_empty() {
            return Err(DispatchError::NothingToResubmit(job_id.clone()));
        }

        let mut builder = DistributionJob::builder(new_job_id)
            .targets(failed)
            .after_action(old.after_action)
            .unpack(old.unpack)
            .clear_old(old.clear_old)
            .stop_before_upload(old.stop_before_upload)
            .throttle_ms(old.throttle_ms);
        if let Some(workspace_id) = &old.workspace_id {
            builder = builder.workspace_id(workspace_id.clone());
        }
        if let Some(sub_path) = &old.sub_path {
            builder = builder.sub_path(sub_path.clone());
        }
        if let Some(principal) = &old.principal {
            builder = builder.principal(principal.clone());
        }
        let job = builder.build();

        self.control.tracker.store().insert_job(&job)?;
        info!(%job_id, new_job_id = %job.id, targets = job.targets.len(), "failed targets resubmitted");
        Ok(job)
    }
}

fn validate_targets(job: &DistributionJob) -> Result<()> {
    if job.targets.is_empty() {
        return Err(DispatchError::NoTargets(job.id.clone()));
    }
    let mut seen = HashSet::with_capacity(job.targets.len());
    for link in &job.targets {
        let folded = (
            link.key.node_id.to_lowercase(),
            link.key.project_id.to_lowercase(),
        );
        if !seen.insert(folded) {
            return Err(DispatchError::DuplicateTarget {
                job:    job.id.clone(),
                target: link.key.clone(),
            });
        }
    }
    Ok(())
}

/// Resolves once the flag is raised. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct Driver<S, A> {
    control:  Arc<Control<S>>,
    agent:    Arc<A>,
    config:   Arc<DispatchConfig>,
    request:  Arc<DeliveryRequest>,
    artifact: Arc<Artifact>,
    job:      DistributionJob,
}

impl<S, A> Driver<S, A>
where
    S: JobStore + 'static,
    A: TargetAgent,
{
    async fn run(self, mut cancel: watch::Receiver<bool>) -> Result<JobSummary> {
        let start = Instant::now();
        let job_id = self.job.id.clone();
        let tracker = Arc::clone(&self.control.tracker);
        let throttle = Duration::from_millis(match self.job.throttle_ms {
            0 => self.config.throttle_ms,
            ms => ms,
        });

        let permits = Arc::new(Semaphore::new(self.config.dispatch_concurrency));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();

        for (i, link) in self.job.targets.iter().enumerate() {
            if *cancel.borrow() {
                break;
            }
            if i > 0 && !throttle.is_zero() {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    _ = tokio::time::sleep(throttle) => {}
                }
            }
            let permit = tokio::select! {
                _ = cancelled(&mut cancel) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = DeliveryTask {
                tracker:   Arc::clone(&tracker),
                agent:     Arc::clone(&self.agent),
                config:    Arc::clone(&self.config),
                artifact:  Arc::clone(&self.artifact),
                request:   Arc::clone(&self.request),
                job_id:    job_id.clone(),
                target:    link.key.clone(),
                principal: self.job.principal.clone(),
            };
            debug!(%job_id, key = %link.key, "delivery submitted");
            let handle = tasks.spawn(async move {
                let _permit = permit;
                task.run().await
            });
            spawned.insert(handle.id(), link.key.clone());
        }

        if *cancel.borrow() {
            // Targets skipped after the flag was raised.
            if let Err(error) = tracker.cancel_waiting(&job_id, None) {
                warn!(%job_id, %error, "could not cancel remaining targets");
            }
        }

        let mut outcomes = Vec::with_capacity(spawned.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Some(outcome))) => outcomes.push(outcome),
                Ok((_, None)) => {}
                Err(error) => {
                    let Some(key) = spawned.get(&error.id()) else { continue };
                    warn!(%job_id, key = %key, %error, "delivery task aborted");
                    let payload = format!("delivery task aborted: {error}");
                    if let Err(error) = tracker.record_transition(&job_id, key, Status::Fail, Some(payload), None) {
                        warn!(%job_id, key = %key, %error, "could not record aborted delivery");
                    }
                }
            }
        }

        let snapshot = tracker.snapshot(&job_id);
        self.control.finish(&job_id);
        let job = snapshot?;

        let summary = JobSummary {
            job_id:    job_id.clone(),
            aggregate: job.status,
            outcomes,
            elapsed:   start.elapsed(),
            targets:   job.targets,
        };
        info!(
            %job_id,
            aggregate = %summary.aggregate,
            ok = summary.count(Status::Ok),
            failed = summary.count(Status::Fail),
            cancelled = summary.count(Status::Cancelled),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "job finished"
        );
        Ok(summary)
    }
}

/// Handle to a started job.
pub struct JobHandle<S> {
    job_id:  JobId,
    control: Arc<Control<S>>,
    task:    JoinHandle<Result<JobSummary>>,
}

impl<S: JobStore> JobHandle<S> {
    pub fn job_id(&self) -> &JobId { &self.job_id }

    /// See [`Dispatcher::cancel`].
    pub fn cancel(&self, principal: Option<&str>) -> Result<Vec<TargetKey>> {
        self.control.cancel(&self.job_id, principal)
    }

    pub fn is_finished(&self) -> bool { self.task.is_finished() }

    /// Wait for every started delivery to finish.
    pub async fn wait(self) -> Result<JobSummary> {
        match self.task.await {
            Ok(summary) => summary,
            Err(error) => {
                self.control.finish(&self.job_id);
                Err(DispatchError::Join(error.to_string()))
            }
        }
    }
}
