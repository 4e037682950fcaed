use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::collaborators::OutputDirectory;
use crate::constants::OUTPUT_SUFFIX;
use crate::data::Data;
use crate::worker::{StageError, Worker};

/// Removes stale artifacts from the output directory.
///
/// A missing directory is success with nothing deleted; an entry that cannot
/// be deleted is logged and skipped. Only failing to enumerate the directory
/// fails the stage. Output is always empty.
pub struct CleanupWorker {
    directory: Arc<dyn OutputDirectory>,
    suffix: String,
}

impl CleanupWorker {
    /// Prunes `*.png` entries of `directory`.
    pub fn new(directory: Arc<dyn OutputDirectory>) -> Self {
        Self::with_suffix(directory, OUTPUT_SUFFIX)
    }

    /// Prunes entries of `directory` ending with `suffix`.
    pub fn with_suffix(directory: Arc<dyn OutputDirectory>, suffix: impl Into<String>) -> Self {
        Self {
            directory,
            suffix: suffix.into(),
        }
    }
}

#[async_trait]
impl Worker for CleanupWorker {
    async fn execute(&self, _input: Data) -> Result<Data, StageError> {
        let Some(entries) = self.directory.list_entries().await.map_err(|e| {
            warn!(error = %e, "error cleaning up");
            StageError::io(e)
        })?
        else {
            debug!("output directory missing; nothing to clean");
            return Ok(Data::empty());
        };

        let mut deleted = 0usize;
        for entry in entries
            .iter()
            .filter(|e| !e.name.is_empty() && e.name.ends_with(&self.suffix))
        {
            let removed = self.directory.delete_entry(entry).await;
            info!(file = %entry.name, deleted = removed, "cleanup");
            deleted += usize::from(removed);
        }
        info!(deleted, "cleanup finished");
        Ok(Data::empty())
    }
}
