use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use fleetcast_dispatch::{
    AfterAction, DispatchConfig, Dispatcher, DistributionJob, JobId, JobStore, LocalAgent, MemoryStore, Status,
    TargetKey,
};
use fleetcast_transfer::ChunkMerger;
use tracing::info;

use crate::ui::{FormatConfig, Formatter, ProgressTracker, TrackerKind, status_rows};

#[derive(Args, Clone, Debug)]
pub struct SendArg {
    #[arg(help = "Artifact to distribute")]
    pub artifact: PathBuf,

    #[arg(long, help = "Root directory of the local fleet")]
    pub root: PathBuf,

    #[arg(short = 't', long = "target", value_name = "NODE:PROJECT", required = true, help = "Target to deliver to, repeatable")]
    pub targets: Vec<TargetKey>,

    #[arg(long, help = "Unpack .tar, .tar.gz and .tgz artifacts into the project")]
    pub unpack: bool,

    #[arg(long, help = "Remove existing project files first")]
    pub clear_old: bool,

    #[arg(long = "stop-first", help = "Stop the project before uploading")]
    pub stop_first: bool,

    #[arg(long, help = "Directory under the project that receives the artifact")]
    pub sub_path: Option<String>,

    #[arg(long = "after", default_value = "none", help = "Action after delivery: none or restart")]
    pub after: AfterAction,

    #[arg(long, help = "Pause between deliveries in milliseconds")]
    pub throttle_ms: Option<u64>,

    #[arg(long, help = "TOML file with dispatch settings")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Recorded as the actor in audit records")]
    pub principal: Option<String>,

    #[arg(long, help = "Job id, generated when omitted")]
    pub job_id: Option<String>,
}

impl SendArg {
    fn job(&self, id: JobId) -> DistributionJob {
        let mut builder = DistributionJob::builder(id)
            .targets(self.targets.iter().cloned())
            .after_action(self.after)
            .unpack(self.unpack)
            .clear_old(self.clear_old)
            .stop_before_upload(self.stop_first)
            .throttle_ms(self.throttle_ms.unwrap_or(0));
        if let Some(sub_path) = &self.sub_path {
            builder = builder.sub_path(sub_path.clone());
        }
        if let Some(principal) = &self.principal {
            builder = builder.principal(principal.clone());
        }
        builder.build()
    }
}

pub async fn send(arg: SendArg) -> Result<()> {
    let config = match &arg.config {
        Some(path) => {
            DispatchConfig::load(path).with_context(|| format!("failed to load config '{}'", path.display()))?
        }
        None => DispatchConfig::default(),
    };

    let job_id = arg.job_id.clone().map(JobId::new).unwrap_or_else(JobId::generate);
    let store = Arc::new(MemoryStore::new());
    store.insert_job(&arg.job(job_id.clone()))?;

    let merger = ChunkMerger::new(config.merge_strategy, config.transfer_options());
    let agent = Arc::new(LocalAgent::with_merger(&arg.root, merger));
    let dispatcher = Dispatcher::new(Arc::clone(&store), agent, config)?;

    let handle = dispatcher
        .start(&job_id, &arg.artifact)
        .await
        .with_context(|| format!("failed to start job '{job_id}'"))?;

    let total = arg.targets.len() as u64;
    let tracker = ProgressTracker::new(total, TrackerKind::Count);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let wait = handle.wait();
    tokio::pin!(wait);
    let summary = loop {
        tokio::select! {
            summary = &mut wait => break summary?,
            _ = ticker.tick() => {
                if let Ok(job) = dispatcher.tracker().snapshot(&job_id) {
                    let done = job.targets.iter().filter(|t| t.status.is_terminal()).count();
                    tracker.pb.set_position(done as u64);
                }
            }
        }
    };
    tracker.finish(Some(format!("job {job_id} {}", summary.aggregate)));

    let table = Formatter::table(
        status_rows(&summary.targets),
        FormatConfig {
            footer: Some(format!(
                "{} ok, {} failed, {} cancelled in {:.1?}",
                summary.count(Status::Ok),
                summary.count(Status::Fail),
                summary.count(Status::Cancelled),
                summary.elapsed
            )),
            ..FormatConfig::default()
        },
    );
    println!("{table}");
    info!(%job_id, inconsistencies = dispatcher.tracker().inconsistencies(), "send finished");

    let failed = summary.count(Status::Fail);
    if failed > 0 {
        bail!("{failed} of {total} targets failed");
    }
    Ok(())
}
