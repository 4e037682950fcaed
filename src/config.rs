//! Runtime configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.taskchain.toml`)
//! 2. Environment variables (with `TASKCHAIN_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [pipeline]
//! work_name = "image_manipulation_work"
//! output_tag = "output"
//! output_dir = "blur_filter_outputs"
//! saved_dir = "saved_images"
//! blur_sigma = 2.0
//!
//! [scheduler]
//! max_concurrent_runs = 4
//! retain_terminal = true
//!
//! [logging]
//! level = "info"
//! pretty = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    IMAGE_MANIPULATION_WORK_NAME, OUTPUT_PATH, OUTPUT_SUFFIX, SAVED_IMAGE_TITLE, TAG_OUTPUT,
};
use crate::error::{Error, Result};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".taskchain.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskchainConfig {
    /// Blur pipeline settings.
    pub pipeline: PipelineSettings,
    /// Scheduler settings.
    pub scheduler: SchedulerSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Settings for the blur pipeline and its filesystem stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Unique work name the pipeline is submitted under.
    pub work_name: String,
    /// Tag carried by the persist stage.
    pub output_tag: String,
    /// Directory holding intermediate artifacts; pruned by cleanup.
    pub output_dir: PathBuf,
    /// Directory receiving published images.
    pub saved_dir: PathBuf,
    /// Suffix of files cleanup removes.
    pub artifact_suffix: String,
    /// Gaussian sigma applied per blur stage.
    pub blur_sigma: f32,
    /// Title prefix of published images.
    pub saved_title: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            work_name: IMAGE_MANIPULATION_WORK_NAME.to_string(),
            output_tag: TAG_OUTPUT.to_string(),
            output_dir: PathBuf::from(OUTPUT_PATH),
            saved_dir: PathBuf::from("saved_images"),
            artifact_suffix: OUTPUT_SUFFIX.to_string(),
            blur_sigma: 2.0,
            saved_title: SAVED_IMAGE_TITLE.to_string(),
        }
    }
}

impl PipelineSettings {
    /// Returns a copy rooted at `base`: relative directories are joined onto it.
    #[must_use]
    pub fn rooted_at(mut self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
        if self.saved_dir.is_relative() {
            self.saved_dir = base.join(&self.saved_dir);
        }
        self
    }
}

/// Settings for the in-process scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Runs executing at once. Further runs stay `Enqueued`.
    pub max_concurrent_runs: usize,
    /// Keep terminal runs observable until pruned.
    pub retain_terminal: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            retain_terminal: true,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Multi-line human-readable output instead of compact lines.
    pub pretty: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
        }
    }
}

impl TaskchainConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `.taskchain.toml` in the working directory
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content. Missing sections take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed TOML.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskchain::TaskchainConfig;
    ///
    /// let config = TaskchainConfig::from_toml("[scheduler]\nmax_concurrent_runs = 1\n").unwrap();
    /// assert_eq!(config.scheduler.max_concurrent_runs, 1);
    /// assert_eq!(config.pipeline.output_tag, "output");
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Apply `TASKCHAIN_*` environment variable overrides. Unparseable values
    /// are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TASKCHAIN_WORK_NAME") {
            self.pipeline.work_name = v;
        }
        if let Some(v) = lookup("TASKCHAIN_OUTPUT_TAG") {
            self.pipeline.output_tag = v;
        }
        if let Some(v) = lookup("TASKCHAIN_OUTPUT_DIR") {
            self.pipeline.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TASKCHAIN_SAVED_DIR") {
            self.pipeline.saved_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TASKCHAIN_BLUR_SIGMA").and_then(|v| v.parse().ok()) {
            self.pipeline.blur_sigma = v;
        }

        if let Some(v) = lookup("TASKCHAIN_MAX_CONCURRENT_RUNS").and_then(|v| v.parse().ok()) {
            self.scheduler.max_concurrent_runs = v;
        }
        if let Some(v) = lookup("TASKCHAIN_RETAIN_TERMINAL").and_then(|v| v.parse().ok()) {
            self.scheduler.retain_terminal = v;
        }

        if let Some(v) = lookup("TASKCHAIN_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("TASKCHAIN_LOG_PRETTY").and_then(|v| v.parse().ok()) {
            self.logging.pretty = v;
        }
    }
}
