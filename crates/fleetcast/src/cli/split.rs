use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use fleetcast_dispatch::{ChunkManifest, parse_size};
use fleetcast_fs::{AtomicWriteOptions, atomic_write};
use fleetcast_transfer::{
    ChunkTransfer, DEFAULT_TRANSFER_CONCURRENCY, Progress, StagingDir, TransferOptions, chunk_count,
};

use crate::ui::{ProgressTracker, TrackerKind};

#[derive(Args, Clone, Debug)]
pub struct SplitArg {
    #[arg(help = "File to split")]
    pub file: PathBuf,

    #[arg(long, help = "New directory that receives the chunks")]
    pub out: PathBuf,

    #[arg(long, default_value = "1MiB", value_parser = parse_size, help = "Chunk size, e.g. 512KiB or 4MB")]
    pub chunk_size: u64,

    #[arg(long, default_value_t = DEFAULT_TRANSFER_CONCURRENCY, help = "Chunks written in parallel")]
    pub concurrency: usize,
}

/// Manifest stored next to the chunks so `merge` can verify the rebuild.
pub fn manifest_path(dir: &Path, file_name: &str) -> PathBuf { dir.join(format!("{file_name}.manifest.json")) }

pub async fn split(arg: SplitArg) -> Result<()> {
    let file_name = arg
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("'{}' has no file name", arg.file.display()))?;
    if arg.out.exists() {
        bail!("output directory '{}' already exists", arg.out.display());
    }

    let len = tokio::fs::metadata(&arg.file)
        .await
        .with_context(|| format!("failed to read '{}'", arg.file.display()))?
        .len();
    let path = arg.file.clone();
    let digest = tokio::task::spawn_blocking(move || fleetcast_verify::sha256_file(&path)).await??;

    let tracker = ProgressTracker::new(len, TrackerKind::Bytes);
    let pb = tracker.handle();
    let options = TransferOptions::default()
        .chunk_size(arg.chunk_size)
        .concurrency(arg.concurrency)
        .on_progress(Arc::new(move |p: &Progress| pb.set_position(p.bytes_completed)));

    let staging = Arc::new(StagingDir::create(&arg.out, file_name.clone())?);
    let report = ChunkTransfer::new(&arg.file, options)
        .run(Arc::clone(&staging))
        .await
        .with_context(|| format!("failed to split '{}'", arg.file.display()))?;

    let manifest = ChunkManifest {
        session: file_name.clone(),
        file_name: file_name.clone(),
        file_len: len,
        chunk_size: arg.chunk_size,
        chunk_count: chunk_count(len, arg.chunk_size)?,
        digest,
    };
    atomic_write(
        manifest_path(staging.path(), &file_name),
        &serde_json::to_vec_pretty(&manifest)?,
        AtomicWriteOptions::new(),
    )?;

    let out = Arc::try_unwrap(staging)
        .map_err(|_| anyhow!("staging directory is still in use"))?
        .keep();
    tracker.finish(Some(format!(
        "{} chunks in {:.1?}",
        report.chunks, report.elapsed
    )));
    println!("{}  {}", manifest.digest, out.display());
    Ok(())
}
