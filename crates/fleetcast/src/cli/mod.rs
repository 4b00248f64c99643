mod digest;
mod merge;
mod send;
mod split;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "fleetcast",
    version = env!("CARGO_PKG_VERSION"),
    about = "Deliver build artifacts to a fleet of targets",
    long_about = None,
    propagate_version = true
)]
pub struct App {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(name = "send", about = "Run a distribution job against a local fleet directory")]
    Send(send::SendArg),
    #[command(name = "split", about = "Stage a file as numbered chunks")]
    Split(split::SplitArg),
    #[command(name = "merge", about = "Rebuild and verify a file from staged chunks")]
    Merge(merge::MergeArg),
    #[command(name = "digest", about = "Print the SHA-256 of a file")]
    Digest(digest::DigestArg),
}

impl App {
    pub async fn run(self) -> Result<()> {
        match self.cmd {
            Commands::Send(arg) => send::send(arg).await,
            Commands::Split(arg) => split::split(arg).await,
            Commands::Merge(arg) => merge::merge(arg).await,
            Commands::Digest(arg) => digest::digest(arg).await,
        }
    }
}
