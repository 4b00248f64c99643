use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fleetcast_dispatch::ChunkManifest;
use fleetcast_transfer::{ChunkMerger, DEFAULT_TRANSFER_CONCURRENCY, MergeStrategy, TransferOptions};
use indicatif::HumanBytes;

use super::split::manifest_path;

#[derive(Args, Clone, Debug)]
pub struct MergeArg {
    #[arg(help = "Directory written by `split`")]
    pub dir: PathBuf,

    #[arg(long, help = "Original file name")]
    pub name: String,

    #[arg(long, help = "Where to write the rebuilt file")]
    pub out: PathBuf,

    #[arg(long, help = "Append chunks in order instead of writing at offsets")]
    pub sequential: bool,
}

pub async fn merge(arg: MergeArg) -> Result<()> {
    let path = manifest_path(&arg.dir, &arg.name);
    let raw = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read manifest '{}'", path.display()))?;
    let manifest: ChunkManifest =
        serde_json::from_slice(&raw).with_context(|| format!("invalid manifest '{}'", path.display()))?;

    let strategy = if arg.sequential {
        MergeStrategy::Sequential
    } else {
        MergeStrategy::Preallocated
    };
    let options = TransferOptions::default()
        .chunk_size(manifest.chunk_size)
        .concurrency(DEFAULT_TRANSFER_CONCURRENCY);
    let report = ChunkMerger::new(strategy, options)
        .rebuild_verified(
            &arg.dir,
            &manifest.file_name,
            manifest.file_len,
            &manifest.digest,
            &arg.out,
        )
        .await
        .with_context(|| format!("failed to rebuild '{}'", manifest.file_name))?;

    println!(
        "{} chunks, {} verified -> {} in {:.1?}",
        report.chunks,
        HumanBytes(report.bytes),
        arg.out.display(),
        report.elapsed
    );
    Ok(())
}
