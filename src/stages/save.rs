use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::collaborators::ArtifactStore;
use super::uri_schema;
use crate::constants::{KEY_IMAGE_URI, SAVED_IMAGE_TITLE};
use crate::data::Data;
use crate::worker::{StageError, Worker};

/// Publishes the artifact at [`KEY_IMAGE_URI`] under a timestamped title and
/// outputs the published URI.
pub struct SaveImageToFileWorker {
    store: Arc<dyn ArtifactStore>,
    title: String,
}

impl SaveImageToFileWorker {
    /// Publishes under the default title.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self::with_title(store, SAVED_IMAGE_TITLE)
    }

    /// Publishes under `title`.
    pub fn with_title(store: Arc<dyn ArtifactStore>, title: impl Into<String>) -> Self {
        Self {
            store,
            title: title.into(),
        }
    }
}

#[async_trait]
impl Worker for SaveImageToFileWorker {
    async fn execute(&self, input: Data) -> Result<Data, StageError> {
        uri_schema().validate(&input)?;
        let source = input.get_string(KEY_IMAGE_URI).unwrap_or_default();

        let bytes = self.store.read_artifact(source).await.map_err(|e| {
            error!(uri = %source, error = %e, "unable to read image");
            StageError::io(e)
        })?;
        let saved = self
            .store
            .publish_artifact(&bytes, &self.title)
            .await
            .map_err(|e| {
                error!(error = %e, "unable to save image");
                StageError::io(e)
            })?;
        info!(uri = %saved, "image saved");

        Data::builder()
            .put_string(KEY_IMAGE_URI, saved)
            .build()
            .map_err(|e| StageError::Transform(e.to_string()))
    }
}
