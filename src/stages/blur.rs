use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::collaborators::{ArtifactStore, ImageTransform, Notifier};
use super::uri_schema;
use crate::constants::KEY_IMAGE_URI;
use crate::data::Data;
use crate::worker::{StageError, Worker};

/// Reads the image at [`KEY_IMAGE_URI`], transforms it, writes the result
/// and outputs its URI under the same key.
pub struct BlurWorker {
    store: Arc<dyn ArtifactStore>,
    transform: Arc<dyn ImageTransform>,
    notifier: Arc<dyn Notifier>,
}

impl BlurWorker {
    /// Creates the stage.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        transform: Arc<dyn ImageTransform>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            transform,
            notifier,
        }
    }
}

#[async_trait]
impl Worker for BlurWorker {
    async fn execute(&self, input: Data) -> Result<Data, StageError> {
        uri_schema().validate(&input).map_err(|violation| {
            error!(%violation, "invalid input uri");
            StageError::from(violation)
        })?;
        let source = input.get_string(KEY_IMAGE_URI).unwrap_or_default();

        let bytes = self.store.read_artifact(source).await.map_err(|e| {
            error!(uri = %source, error = %e, "error reading image");
            StageError::io(e)
        })?;

        let transform = Arc::clone(&self.transform);
        let blurred = tokio::task::spawn_blocking(move || transform.apply(&bytes))
            .await
            .map_err(|e| StageError::Panicked(e.to_string()))??;

        let output_uri = self.store.write_artifact(&blurred).await.map_err(|e| {
            error!(error = %e, "error writing image");
            StageError::io(e)
        })?;
        debug!(from = %source, to = %output_uri, "blurred image");

        self.notifier.notify_user(&format!("Output is {output_uri}"));

        Data::builder()
            .put_string(KEY_IMAGE_URI, output_uri)
            .build()
            .map_err(|e| StageError::Transform(e.to_string()))
    }
}
