use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use taskchain::stages::{CleanupWorker, FsOutputDirectory};
use taskchain::{run_guarded, Data, StageOutcome, TaskchainConfig};

pub async fn execute(config: &TaskchainConfig) -> Result<()> {
    let dir = &config.pipeline.output_dir;
    let worker = CleanupWorker::with_suffix(
        Arc::new(FsOutputDirectory::new(dir)),
        config.pipeline.artifact_suffix.clone(),
    );

    match run_guarded(&worker, Data::empty()).await {
        StageOutcome::Success(_) => {
            println!("  {} Cleaned {}", "✓".green(), dir.display());
            Ok(())
        },
        StageOutcome::Failure(err) => {
            println!("  {} Cleanup of {} failed", "✗".red(), dir.display());
            Err(err.into())
        },
    }
}
