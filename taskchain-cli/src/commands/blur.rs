use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use futures::StreamExt;
use taskchain::stages::filesystem_registry;
use taskchain::stages::fs::{to_path, to_uri};
use taskchain::{
    BlurCoordinator, DeviceState, RunState, TaskId, TaskState, TaskchainConfig, WorkInfo,
    KEY_IMAGE_URI,
};
use taskchain_scheduler::{ConstraintMonitor, InMemoryScheduler};

pub struct BlurOptions {
    pub image: PathBuf,
    pub level: u32,
    pub charging: bool,
    pub charge_after: Option<u64>,
    pub json: bool,
}

pub async fn execute(config: TaskchainConfig, options: BlurOptions) -> Result<()> {
    let image = options
        .image
        .canonicalize()
        .with_context(|| format!("image {}", options.image.display()))?;

    let settings = config.pipeline;
    let monitor = ConstraintMonitor::new(DeviceState::default().with_charging(options.charging));
    let scheduler = Arc::new(
        InMemoryScheduler::new(filesystem_registry(&settings), monitor.clone())
            .with_config(config.scheduler),
    );
    let mut coordinator = BlurCoordinator::new(scheduler, settings);
    coordinator.set_image_uri(&to_uri(&image));

    println!(
        "\n{}",
        format!("Blurring {} ({} passes)", image.display(), options.level)
            .bright_cyan()
            .bold()
    );
    let handle = coordinator.apply_blur(options.level).await?;

    if let Some(secs) = options.charge_after {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            monitor.set_charging(true);
        });
    }

    let mut progress = Progress::default();
    let mut updates = handle.updates();
    let state = loop {
        tokio::select! {
            snapshot = updates.next() => {
                let Some(infos) = snapshot else {
                    bail!("scheduler dropped run {}", handle.run_id());
                };
                for line in progress.changes(&infos) {
                    println!("{line}");
                }
                let state = RunState::from_infos(&infos);
                if state.is_terminal() {
                    break state;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("  {} Cancelling", "!".yellow());
                coordinator.cancel_work().await?;
            },
        }
    };

    let infos = handle.snapshot();
    if options.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    }

    match state {
        RunState::Succeeded => {
            let saved = handle
                .task_ids()
                .last()
                .and_then(|id| handle.task_info(*id))
                .and_then(|info| info.output.get_string(KEY_IMAGE_URI).map(str::to_string))
                .context("save stage produced no uri")?;
            coordinator.set_output_uri(&saved);
            println!(
                "\n  {} Saved to {}",
                "✓".green(),
                to_path(&saved).display()
            );
            Ok(())
        },
        RunState::Cancelled => {
            println!("\n  {} Cancelled", "!".yellow());
            Ok(())
        },
        other => {
            for info in infos.iter().filter(|info| info.error.is_some()) {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    info.worker,
                    info.error.as_deref().unwrap_or_default()
                );
            }
            bail!("blur run {other}")
        },
    }
}

/// Turns successive snapshots into one line per task state change.
#[derive(Default)]
struct Progress {
    seen: HashMap<TaskId, TaskState>,
}

impl Progress {
    fn changes(&mut self, infos: &[WorkInfo]) -> Vec<String> {
        let mut lines = Vec::new();
        for (index, info) in infos.iter().enumerate() {
            if self.seen.insert(info.task_id, info.state) == Some(info.state) {
                continue;
            }
            lines.push(format!("  {} {}", format!("[{}]", index + 1).dimmed(), describe(info)));
        }
        lines
    }
}

fn describe(info: &WorkInfo) -> String {
    let state = match info.state {
        TaskState::Succeeded => info.state.to_string().green(),
        TaskState::Failed => info.state.to_string().red(),
        TaskState::Cancelled | TaskState::Blocked => info.state.to_string().yellow(),
        TaskState::Enqueued | TaskState::Running => info.state.to_string().normal(),
    };
    if info.blocked_by.is_empty() {
        format!("{:<24} {state}", info.worker.as_str())
    } else {
        let waiting: Vec<String> = info.blocked_by.iter().map(ToString::to_string).collect();
        format!(
            "{:<24} {state} (waiting for {})",
            info.worker.as_str(),
            waiting.join(", ")
        )
    }
}
