use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Furthest byte offset known to be persisted.
    pub bytes_completed: u64,
    /// Total artifact length.
    pub total_bytes: u64,
    /// Index of the chunk whose completion produced this snapshot.
    pub chunk_index: u32,
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_completed as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool { self.bytes_completed >= self.total_bytes }
}

pub type ProgressObserver = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Shared, lock-free progress counter.
///
/// Workers finish chunks out of order, so the counter only ever moves
/// forward: it records the highest chunk end seen so far. Readers never
/// block writers.
pub struct TransferProgress {
    completed: AtomicU64,
    total:     u64,
    observer:  Option<ProgressObserver>,
}

impl fmt::Debug for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferProgress")
            .field("completed", &self.completed)
            .field("total", &self.total)
            .field("observer", &self.observer.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

impl TransferProgress {
    pub fn new(total: u64, observer: Option<ProgressObserver>) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            observer,
        }
    }

    /// Record that the chunk ending at `end` has been persisted.
    pub fn advance(&self, chunk_index: u32, end: u64) {
        let previous = self.completed.fetch_max(end, Ordering::AcqRel);
        if let Some(observer) = &self.observer {
            observer(&Progress {
                bytes_completed: previous.max(end),
                total_bytes: self.total,
                chunk_index,
            });
        }
    }

    pub fn bytes_completed(&self) -> u64 { self.completed.load(Ordering::Acquire) }

    pub fn total(&self) -> u64 { self.total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_never_moves_backwards() {
        let progress = TransferProgress::new(300, None);
        progress.advance(2, 300);
        progress.advance(0, 100);
        progress.advance(1, 200);
        assert_eq!(progress.bytes_completed(), 300);
    }

    #[test]
    fn test_observer_receives_snapshots() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ProgressObserver = Arc::new(move |p: &Progress| sink.lock().unwrap().push(*p));
        let progress = TransferProgress::new(200, Some(observer));

        progress.advance(1, 200);
        progress.advance(0, 100);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_complete());
        assert_eq!(seen[1].bytes_completed, 200);
        assert_eq!(seen[1].chunk_index, 0);
    }

    #[test]
    fn test_percentage() {
        let p = Progress {
            bytes_completed: 50,
            total_bytes: 200,
            chunk_index: 0,
        };
        assert_eq!(p.percentage(), 25.0);
    }
}
