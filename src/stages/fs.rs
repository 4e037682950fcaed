//! Filesystem-backed collaborators.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tracing::info;
use uuid::Uuid;

use super::collaborators::{ArtifactStore, DirectoryEntry, Notifier, OutputDirectory};

const FILE_SCHEME: &str = "file://";

/// Stores artifacts as files: intermediates in `output_dir`, published
/// images in `saved_dir`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    output_dir: PathBuf,
    saved_dir: PathBuf,
    suffix: String,
}

impl FsArtifactStore {
    /// Creates a store writing `*{suffix}` files.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        saved_dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            saved_dir: saved_dir.into(),
            suffix: suffix.into(),
        }
    }

    /// Directory holding intermediate artifacts.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn write_into(dir: &Path, file_name: String, bytes: &[u8]) -> io::Result<String> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        Ok(to_uri(&path))
    }
}

/// Converts a path into a `file://` URI.
pub fn to_uri(path: &Path) -> String {
    format!("{FILE_SCHEME}{}", path.display())
}

/// Converts a `file://` URI or plain path into a path.
pub fn to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix(FILE_SCHEME).unwrap_or(uri))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn read_artifact(&self, uri: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(to_path(uri)).await
    }

    async fn write_artifact(&self, bytes: &[u8]) -> io::Result<String> {
        let file_name = format!("blur-filter-output-{}{}", Uuid::new_v4(), self.suffix);
        Self::write_into(&self.output_dir, file_name, bytes).await
    }

    async fn publish_artifact(&self, bytes: &[u8], title: &str) -> io::Result<String> {
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let unique = Uuid::new_v4().simple().to_string();
        let file_name = format!("{title}-{stamp}-{}{}", &unique[..8], self.suffix);
        Self::write_into(&self.saved_dir, file_name, bytes).await
    }
}

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsOutputDirectory {
    dir: PathBuf,
}

impl FsOutputDirectory {
    /// Wraps `dir`; it need not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl OutputDirectory for FsOutputDirectory {
    async fn list_entries(&self) -> io::Result<Option<Vec<DirectoryEntry>>> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    async fn delete_entry(&self, entry: &DirectoryEntry) -> bool {
        tokio::fs::remove_file(&entry.path).await.is_ok()
    }
}

/// Emits notifications as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_user(&self, message: &str) {
        info!(target: "taskchain::notification", "{message}");
    }
}
