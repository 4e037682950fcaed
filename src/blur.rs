//! Assembles and controls the image blur pipeline.
//!
//! The pipeline is `Cleanup -> Blur x level -> Save`, submitted under one
//! unique name with [`UniqueWorkPolicy::Replace`], so a new request always
//! supersedes a running one. Only the first blur stage is given the source
//! image; later stages read their predecessor's output. The save stage waits
//! for the device to charge and carries the output tag, which is how callers
//! observe the final result.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::PipelineSettings;
use crate::constants::KEY_IMAGE_URI;
use crate::constraint::Constraints;
use crate::data::Data;
use crate::error::Result;
use crate::handle::PipelineHandle;
use crate::pipeline::{PipelineBuilder, UniqueWorkPolicy};
use crate::scheduler::{CancelOutcome, Scheduler, WorkInfoStream};
use crate::stages::{BLUR_WORKER, CLEANUP_WORKER, SAVE_WORKER};
use crate::task::{StageKind, WorkRequest};

/// Composition helper owning the blur pipeline's unique name and tag.
pub struct BlurCoordinator {
    scheduler: Arc<dyn Scheduler>,
    settings: PipelineSettings,
    image_uri: Option<String>,
    output_uri: Option<String>,
}

impl BlurCoordinator {
    /// Creates a coordinator submitting to `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>, settings: PipelineSettings) -> Self {
        Self {
            scheduler,
            settings,
            image_uri: None,
            output_uri: None,
        }
    }

    /// Selects the source image. An empty string clears it.
    pub fn set_image_uri(&mut self, uri: &str) {
        self.image_uri = uri_or_none(uri);
    }

    /// The selected source image.
    pub fn image_uri(&self) -> Option<&str> {
        self.image_uri.as_deref()
    }

    /// Records the published image. An empty string clears it.
    pub fn set_output_uri(&mut self, uri: &str) {
        self.output_uri = uri_or_none(uri);
    }

    /// The last published image.
    pub fn output_uri(&self) -> Option<&str> {
        self.output_uri.as_deref()
    }

    /// Settings in use.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Builds, without submitting, the pipeline for `level` blur passes.
    ///
    /// With `level == 0` the source image goes straight to the save stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataTooLarge`](crate::Error::DataTooLarge) if the
    /// source image URI does not fit in a task payload.
    pub fn build_pipeline(&self, level: u32) -> Result<PipelineBuilder> {
        let source = self.source_input()?;
        let mut builder = PipelineBuilder::begin_unique_work(
            Arc::clone(&self.scheduler),
            self.settings.work_name.clone(),
            WorkRequest::from_worker(StageKind::Cleanup, CLEANUP_WORKER),
        );

        for pass in 0..level {
            let mut blur = WorkRequest::builder(StageKind::Transform, BLUR_WORKER);
            if pass == 0 {
                blur = blur.input(source.clone());
            }
            builder = builder.then(blur.build());
        }

        let mut save = WorkRequest::builder(StageKind::Persist, SAVE_WORKER)
            .constraints(Constraints::none().with_requires_charging(true))
            .tag(self.settings.output_tag.clone());
        if level == 0 {
            save = save.input(source);
        }
        Ok(builder.then(save.build()))
    }

    /// Replaces any running blur pipeline with a new one of `level` passes.
    ///
    /// # Errors
    ///
    /// Propagates validation and scheduler errors.
    pub async fn apply_blur(&self, level: u32) -> Result<PipelineHandle> {
        info!(level, image = ?self.image_uri, "applying blur");
        self.build_pipeline(level)?
            .submit(UniqueWorkPolicy::Replace)
            .await
    }

    /// Cancels every run under the pipeline's unique name.
    ///
    /// # Errors
    ///
    /// Propagates scheduler errors.
    pub async fn cancel_work(&self) -> Result<CancelOutcome> {
        let outcome = self
            .scheduler
            .cancel_by_name(&self.settings.work_name)
            .await?;
        debug!(name = %self.settings.work_name, ?outcome, "cancel requested");
        Ok(outcome)
    }

    /// Live status of every task carrying the output tag.
    pub fn output_work_info(&self) -> WorkInfoStream {
        self.scheduler.query_by_tag(&self.settings.output_tag)
    }

    fn source_input(&self) -> Result<Data> {
        let mut builder = Data::builder();
        if let Some(uri) = &self.image_uri {
            builder = builder.put_string(KEY_IMAGE_URI, uri.as_str());
        }
        builder.build()
    }
}

fn uri_or_none(uri: &str) -> Option<String> {
    (!uri.is_empty()).then(|| uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_or_none_treats_empty_as_absent() {
        assert_eq!(uri_or_none(""), None);
        assert_eq!(uri_or_none("file:///a.png"), Some("file:///a.png".to_string()));
    }
}
