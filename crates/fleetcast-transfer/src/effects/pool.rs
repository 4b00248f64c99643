//! Bounded worker pool over a shared chunk queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::data::ChunkDescriptor;
use crate::error::{Result, TransferError};

/// Outcome of a completed pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Indices in the order workers picked them up.
    pub started:   Vec<u32>,
    pub completed: u32,
}

struct Shared {
    queue:     Mutex<VecDeque<ChunkDescriptor>>,
    started:   Mutex<Vec<u32>>,
    completed: AtomicU32,
    cancelled: AtomicBool,
}

impl Shared {
    fn next(&self) -> Option<ChunkDescriptor> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let chunk = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()?;
        self.started.lock().unwrap_or_else(PoisonError::into_inner).push(chunk.index);
        Some(chunk)
    }

    fn abort(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Runs one unit of work per chunk with at most `concurrency` in flight.
///
/// All descriptors go into a single queue; each worker repeatedly takes the
/// next one and runs it to completion. The first failure raises a shared
/// flag and drains the queue: chunks already running finish, nothing new
/// starts, and the run fails with that first error. Chunks are never
/// retried. Each run starts with a fresh flag, so a pool can be reused after
/// a failed run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPool {
    concurrency: usize,
}

impl ChunkPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run<F, Fut>(&self, chunks: Vec<ChunkDescriptor>, work: F) -> Result<PoolReport>
    where
        F: Fn(ChunkDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let total = chunks.len() as u32;
        if total == 0 {
            return Ok(PoolReport::default());
        }

        let workers = self.concurrency.min(chunks.len());
        let shared = Arc::new(Shared {
            queue:     Mutex::new(VecDeque::from(chunks)),
            started:   Mutex::new(Vec::with_capacity(total as usize)),
            completed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        });
        let work = Arc::new(work);

        debug!(workers, chunks = total, "starting chunk pool");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            let work = Arc::clone(&work);
            set.spawn(async move {
                while let Some(chunk) = shared.next() {
                    if let Err(error) = work(chunk).await {
                        warn!(worker, chunk = chunk.index, %error, "chunk failed, draining queue");
                        shared.abort();
                        return Err(error);
                    }
                    shared.completed.fetch_add(1, Ordering::AcqRel);
                }
                Ok(())
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(if e.is_panic() {
                    TransferError::WorkerPanicked
                } else {
                    TransferError::Cancelled
                })
            });
            if let Err(error) = outcome {
                shared.abort();
                first_error.get_or_insert(error);
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        let completed = shared.completed.load(Ordering::Acquire);
        if completed < total {
            return Err(TransferError::Cancelled);
        }

        let started = std::mem::take(&mut *shared.started.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(PoolReport { started, completed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan_chunks;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_chunk_runs_once() {
        let chunks = plan_chunks(10 * 1024, 1024).unwrap();
        let report = ChunkPool::new(3).run(chunks, |_| async { Ok(()) }).await.unwrap();

        assert_eq!(report.completed, 10);
        let unique: HashSet<_> = report.started.iter().copied().collect();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_concurrency() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let chunks = plan_chunks(40, 1).unwrap();

        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        ChunkPool::new(4)
            .run(chunks, move |_| {
                let (f, p) = (Arc::clone(&f), Arc::clone(&p));
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_drains_queue() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chunks = plan_chunks(100, 1).unwrap();

        let log = Arc::clone(&seen);
        let result = ChunkPool::new(4)
            .run(chunks, move |chunk| {
                log.lock().unwrap().push(chunk.index);
                async move {
                    if chunk.index == 37 {
                        return Err(TransferError::MissingChunk { index: 37 });
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(TransferError::MissingChunk { index: 37 })));

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "a chunk was started twice");
        assert!(seen.len() <= 100);
        assert!(seen.contains(&37));
    }

    #[tokio::test]
    async fn test_pool_runs_again_after_a_failure() {
        let pool = ChunkPool::new(2);
        let failed = pool
            .run(plan_chunks(10, 1).unwrap(), |chunk| async move {
                if chunk.index == 0 {
                    return Err(TransferError::MissingChunk { index: 0 });
                }
                Ok(())
            })
            .await;
        assert!(matches!(failed, Err(TransferError::MissingChunk { index: 0 })));

        let report = pool
            .run(plan_chunks(10, 1).unwrap(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(report.completed, 10);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let chunks = plan_chunks(3, 1).unwrap();
        let result = ChunkPool::new(2)
            .run(chunks, |chunk| async move {
                if chunk.index == 1 {
                    panic!("boom");
                }
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(TransferError::WorkerPanicked)));
    }
}
