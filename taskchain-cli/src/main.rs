//! taskchain: run the image blur pipeline from the command line.
//!
//! Configuration comes from `.taskchain.toml` (or `--config`) with
//! `TASKCHAIN_*` environment overrides. The save stage only runs while the
//! device is charging; `--charging` and `--charge-after` stand in for a
//! power monitor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskchain::TaskchainConfig;

mod commands;

/// Ordered, replaceable background pipelines
#[derive(Parser)]
#[command(name = "taskchain")]
#[command(about = "Blur images through a cleanup -> blur -> save pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to .taskchain.toml when present)
    #[arg(long, global = true, env = "TASKCHAIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Blur an image and publish the result
    ///
    /// Replaces any blur already running under the configured work name.
    Blur {
        /// Image to blur
        #[arg(long)]
        image: PathBuf,

        /// Number of blur passes (0 publishes the source unchanged)
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(0..=10))]
        level: u32,

        /// Start with the device charging
        #[arg(long)]
        charging: bool,

        /// Start charging after this many seconds
        #[arg(long, value_name = "SECS", conflicts_with = "charging")]
        charge_after: Option<u64>,

        /// Print the final work info as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete intermediate artifacts from the output directory
    Cleanup,

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TaskchainConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TaskchainConfig::load().context("loading configuration")?,
    };
    taskchain::logging::init(&config.logging)?;

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Blur {
            image,
            level,
            charging,
            charge_after,
            json,
        } => {
            let options = commands::blur::BlurOptions {
                image,
                level,
                charging,
                charge_after,
                json,
            };
            runtime.block_on(commands::blur::execute(config, options))?;
        },
        Commands::Cleanup => {
            runtime.block_on(commands::cleanup::execute(&config))?;
        },
        Commands::Config => {
            commands::config::execute(&config)?;
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_arguments_parse() {
        let cli = Cli::try_parse_from([
            "taskchain",
            "blur",
            "--image",
            "cat.png",
            "--level",
            "3",
            "--charge-after",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Blur {
                image,
                level,
                charging,
                charge_after,
                json,
            } => {
                assert_eq!(image, PathBuf::from("cat.png"));
                assert_eq!(level, 3);
                assert!(!charging);
                assert_eq!(charge_after, Some(5));
                assert!(!json);
            },
            _ => panic!("expected blur"),
        }
    }

    #[test]
    fn charging_flags_conflict() {
        assert!(Cli::try_parse_from([
            "taskchain",
            "blur",
            "--image",
            "cat.png",
            "--charging",
            "--charge-after",
            "5",
        ])
        .is_err());
    }

    #[test]
    fn level_is_bounded() {
        assert!(Cli::try_parse_from(["taskchain", "blur", "--image", "a.png", "--level", "11"]).is_err());
    }
}
