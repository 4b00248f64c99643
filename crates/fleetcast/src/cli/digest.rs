use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Clone, Debug)]
pub struct DigestArg {
    #[arg(help = "File to hash")]
    pub file: PathBuf,
}

pub async fn digest(arg: DigestArg) -> Result<()> {
    let path = arg.file.clone();
    let hex = tokio::task::spawn_blocking(move || fleetcast_verify::sha256_file(&path))
        .await?
        .with_context(|| format!("failed to hash '{}'", arg.file.display()))?;
    println!("{hex}  {}", arg.file.display());
    Ok(())
}
