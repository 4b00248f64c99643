use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fleetcast_transfer::{
    ChunkDescriptor, ChunkMerger, ChunkSink, ChunkTransfer, MergeStrategy, StagingDir,
    TransferError, TransferOptions,
};
use tempfile::tempdir;

fn artifact(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_split_then_merge_reproduces_digest() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("service.tar.gz");
    std::fs::write(&source, artifact(2_500_000)).unwrap();
    let digest = fleetcast_verify::sha256_file(&source).unwrap();

    let options = TransferOptions::default().concurrency(2);
    let staging = Arc::new(StagingDir::create(dir.path().join("session"), "service.tar.gz").unwrap());
    let report = ChunkTransfer::new(&source, options.clone())
        .run(Arc::clone(&staging))
        .await
        .unwrap();
    assert_eq!(report.chunks, 3);

    for strategy in [MergeStrategy::Preallocated, MergeStrategy::Sequential] {
        let out = dir.path().join(format!("rebuilt-{strategy:?}"));
        ChunkMerger::new(strategy, options.clone())
            .rebuild_verified(staging.path(), "service.tar.gz", 2_500_000, &digest, &out)
            .await
            .unwrap();
        assert_eq!(fleetcast_verify::sha256_file(&out).unwrap(), digest);
    }
}

/// Fails on one chunk and records every chunk it was asked to write.
struct FailingSink {
    fail_on: u32,
    seen:    Mutex<Vec<u32>>,
}

impl ChunkSink for FailingSink {
    type Error = io::Error;

    async fn write_chunk(&self, chunk: &ChunkDescriptor, _data: Bytes) -> io::Result<()> {
        self.seen.lock().unwrap().push(chunk.index);
        if chunk.index == self.fail_on {
            return Err(io::Error::other("disk full"));
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failed_chunk_aborts_the_transfer() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("app.jar");
    std::fs::write(&source, artifact(100 * 1024)).unwrap();

    let sink = Arc::new(FailingSink {
        fail_on: 37,
        seen:    Mutex::new(Vec::new()),
    });
    let options = TransferOptions::default().chunk_size(1024).concurrency(4);
    let result = ChunkTransfer::new(&source, options).run(Arc::clone(&sink)).await;

    match result {
        Err(TransferError::Sink { index, .. }) => assert_eq!(index, 37),
        other => panic!("expected sink failure, got {other:?}"),
    }

    let seen = sink.seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a chunk index was processed twice");
    assert!(seen.len() <= 100);
}
