use std::io;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::worker::StageError;

/// Reads and writes image artifacts addressed by URI.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reads the artifact at `uri`.
    async fn read_artifact(&self, uri: &str) -> io::Result<Vec<u8>>;

    /// Stores `bytes` as a new intermediate artifact, returning its URI.
    async fn write_artifact(&self, bytes: &[u8]) -> io::Result<String>;

    /// Publishes `bytes` as a user-visible artifact titled `title`,
    /// returning its URI.
    async fn publish_artifact(&self, bytes: &[u8], title: &str) -> io::Result<String>;
}

/// One entry of an [`OutputDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// File name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
}

/// The directory holding intermediate artifacts.
#[async_trait]
pub trait OutputDirectory: Send + Sync {
    /// Lists entries; `Ok(None)` means the directory does not exist.
    async fn list_entries(&self) -> io::Result<Option<Vec<DirectoryEntry>>>;

    /// Deletes one entry, returning whether it was removed.
    async fn delete_entry(&self, entry: &DirectoryEntry) -> bool;
}

/// Best-effort user notification. Never fails the calling stage.
pub trait Notifier: Send + Sync {
    /// Shows `message` to the user.
    fn notify_user(&self, message: &str);
}

/// A pure, CPU-bound image transformation.
pub trait ImageTransform: Send + Sync {
    /// Transforms encoded image bytes into encoded image bytes.
    fn apply(&self, bytes: &[u8]) -> Result<Vec<u8>, StageError>;
}
