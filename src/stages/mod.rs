//! The blur pipeline's stages and the collaborators they depend on.
//!
//! Stages never touch the filesystem directly. They talk to an
//! [`ArtifactStore`], an [`OutputDirectory`] and a [`Notifier`], so tests can
//! substitute in-memory fakes and the scheduler never sees an I/O type.
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | [`CleanupWorker`] | ignored | empty |
//! | [`BlurWorker`] | `uri` (non-empty) | `uri` of the blurred artifact |
//! | [`SaveImageToFileWorker`] | `uri` (non-empty) | `uri` of the published image |

mod blur;
mod cleanup;
mod collaborators;
pub mod fs;
mod save;
mod transform;

use std::sync::Arc;

pub use blur::BlurWorker;
pub use cleanup::CleanupWorker;
pub use collaborators::{ArtifactStore, DirectoryEntry, ImageTransform, Notifier, OutputDirectory};
pub use fs::{FsArtifactStore, FsOutputDirectory, TracingNotifier};
pub use save::SaveImageToFileWorker;
pub use transform::GaussianBlur;

use crate::config::PipelineSettings;
use crate::constants::KEY_IMAGE_URI;
use crate::data::DataSchema;
use crate::worker::WorkerRegistry;

/// Registry name of [`CleanupWorker`].
pub const CLEANUP_WORKER: &str = "CleanupWorker";
/// Registry name of [`BlurWorker`].
pub const BLUR_WORKER: &str = "BlurWorker";
/// Registry name of [`SaveImageToFileWorker`].
pub const SAVE_WORKER: &str = "SaveImageToFileWorker";

/// Input contract shared by the blur and save stages.
pub fn uri_schema() -> DataSchema {
    DataSchema::new().require_non_empty_string(KEY_IMAGE_URI)
}

/// Registers the three stages against the local filesystem.
pub fn filesystem_registry(settings: &PipelineSettings) -> WorkerRegistry {
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
        &settings.output_dir,
        &settings.saved_dir,
        settings.artifact_suffix.clone(),
    ));
    let directory: Arc<dyn OutputDirectory> = Arc::new(FsOutputDirectory::new(&settings.output_dir));

    WorkerRegistry::new()
        .register(
            CLEANUP_WORKER,
            Arc::new(CleanupWorker::with_suffix(
                directory,
                settings.artifact_suffix.clone(),
            )),
        )
        .register(
            BLUR_WORKER,
            Arc::new(BlurWorker::new(
                Arc::clone(&store),
                Arc::new(GaussianBlur::new(settings.blur_sigma)),
                Arc::new(TracingNotifier),
            )),
        )
        .register(
            SAVE_WORKER,
            Arc::new(SaveImageToFileWorker::with_title(
                store,
                settings.saved_title.clone(),
            )),
        )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data::Data;
    use crate::task::WorkerName;
    use crate::worker::{StageError, Worker};

    // ─── Fakes ───────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
        reads: AtomicUsize,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn with_file(uri: &str, bytes: &[u8]) -> Self {
            let store = Self::default();
            store
                .files
                .lock()
                .unwrap()
                .insert(uri.to_string(), bytes.to_vec());
            store
        }
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn read_artifact(&self, uri: &str) -> io::Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(uri)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, uri.to_string()))
        }

        async fn write_artifact(&self, bytes: &[u8]) -> io::Result<String> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let mut files = self.files.lock().unwrap();
            let uri = format!("mem://out-{}", files.len());
            files.insert(uri.clone(), bytes.to_vec());
            Ok(uri)
        }

        async fn publish_artifact(&self, bytes: &[u8], title: &str) -> io::Result<String> {
            let uri = format!("mem://saved/{title}");
            self.files
                .lock()
                .unwrap()
                .insert(uri.clone(), bytes.to_vec());
            Ok(uri)
        }
    }

    struct Reverse;

    impl ImageTransform for Reverse {
        fn apply(&self, bytes: &[u8]) -> Result<Vec<u8>, StageError> {
            Ok(bytes.iter().rev().copied().collect())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify_user(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    struct FakeDirectory {
        entries: Option<Vec<&'static str>>,
        undeletable: &'static str,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutputDirectory for FakeDirectory {
        async fn list_entries(&self) -> io::Result<Option<Vec<DirectoryEntry>>> {
            Ok(self.entries.as_ref().map(|names| {
                names
                    .iter()
                    .map(|name| DirectoryEntry {
                        name: (*name).to_string(),
                        path: PathBuf::from(name),
                    })
                    .collect()
            }))
        }

        async fn delete_entry(&self, entry: &DirectoryEntry) -> bool {
            if entry.name == self.undeletable {
                return false;
            }
            self.deleted.lock().unwrap().push(entry.name.clone());
            true
        }
    }

    struct BrokenDirectory;

    #[async_trait]
    impl OutputDirectory for BrokenDirectory {
        async fn list_entries(&self) -> io::Result<Option<Vec<DirectoryEntry>>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }

        async fn delete_entry(&self, _entry: &DirectoryEntry) -> bool {
            false
        }
    }

    fn uri(value: &str) -> Data {
        Data::builder()
            .put_string(KEY_IMAGE_URI, value)
            .build()
            .unwrap()
    }

    // ─── Cleanup ─────────────────────────────────────────────────────────

    mod cleanup {
        use super::*;
        use pretty_assertions::assert_eq;

        #[tokio::test]
        async fn deletes_only_matching_entries_and_skips_failures() {
            let dir = Arc::new(FakeDirectory {
                entries: Some(vec!["a.png", "b.txt", "c.png", "locked.png"]),
                undeletable: "locked.png",
                deleted: Mutex::new(Vec::new()),
            });
            let worker = CleanupWorker::new(dir.clone());

            let output = worker.execute(Data::empty()).await.unwrap();
            assert!(output.is_empty());
            assert_eq!(*dir.deleted.lock().unwrap(), vec!["a.png", "c.png"]);
        }

        #[tokio::test]
        async fn missing_directory_is_success() {
            let dir = Arc::new(FakeDirectory {
                entries: None,
                undeletable: "",
                deleted: Mutex::new(Vec::new()),
            });
            let output = CleanupWorker::new(dir.clone())
                .execute(Data::empty())
                .await
                .unwrap();
            assert!(output.is_empty());
            assert!(dir.deleted.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn enumeration_error_fails() {
            let err = CleanupWorker::new(Arc::new(BrokenDirectory))
                .execute(Data::empty())
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::TransientIo(_)));
        }

        #[tokio::test]
        async fn real_directory_is_pruned() {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::write(tmp.path().join("old.png"), b"x").unwrap();
            std::fs::write(tmp.path().join("keep.jpg"), b"x").unwrap();

            CleanupWorker::new(Arc::new(FsOutputDirectory::new(tmp.path())))
                .execute(Data::empty())
                .await
                .unwrap();
            assert!(!tmp.path().join("old.png").exists());
            assert!(tmp.path().join("keep.jpg").exists());
        }
    }

    // ─── Blur ────────────────────────────────────────────────────────────

    mod blur {
        use super::*;
        use pretty_assertions::assert_eq;

        fn worker(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> BlurWorker {
            BlurWorker::new(store, Arc::new(Reverse), notifier)
        }

        #[tokio::test]
        async fn transforms_and_reports_new_uri() {
            let store = Arc::new(MemoryStore::with_file("mem://in", b"abc"));
            let notifier = Arc::new(RecordingNotifier::default());

            let output = worker(store.clone(), notifier.clone())
                .execute(uri("mem://in"))
                .await
                .unwrap();

            let new_uri = output.get_string(KEY_IMAGE_URI).unwrap().to_string();
            assert_ne!(new_uri, "mem://in");
            assert_eq!(store.read_artifact(&new_uri).await.unwrap(), b"cba");
            assert_eq!(
                *notifier.messages.lock().unwrap(),
                vec![format!("Output is {new_uri}")]
            );
        }

        #[tokio::test]
        async fn empty_input_fails_without_reading() {
            let store = Arc::new(MemoryStore::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let blur = worker(store.clone(), notifier.clone());

            for input in [Data::empty(), uri("")] {
                let err = blur.execute(input).await.unwrap_err();
                assert!(matches!(err, StageError::InvalidInput { ref key, .. } if key == KEY_IMAGE_URI));
            }
            assert_eq!(store.reads.load(Ordering::SeqCst), 0);
            assert!(notifier.messages.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn unreadable_source_is_io_failure() {
            let err = worker(
                Arc::new(MemoryStore::default()),
                Arc::new(RecordingNotifier::default()),
            )
            .execute(uri("mem://missing"))
            .await
            .unwrap_err();
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn write_failure_skips_notification() {
            let store = Arc::new(MemoryStore {
                fail_writes: true,
                ..MemoryStore::with_file("mem://in", b"abc")
            });
            let notifier = Arc::new(RecordingNotifier::default());
            let err = worker(store, notifier.clone())
                .execute(uri("mem://in"))
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::TransientIo(_)));
            assert!(notifier.messages.lock().unwrap().is_empty());
        }
    }

    // ─── Save ────────────────────────────────────────────────────────────

    mod save {
        use super::*;
        use pretty_assertions::assert_eq;

        #[tokio::test]
        async fn publishes_under_title() {
            let store = Arc::new(MemoryStore::with_file("mem://blurred", b"img"));
            let output = SaveImageToFileWorker::with_title(store.clone(), "Shot")
                .execute(uri("mem://blurred"))
                .await
                .unwrap();
            assert_eq!(output.get_string(KEY_IMAGE_URI), Some("mem://saved/Shot"));
            assert_eq!(
                store.read_artifact("mem://saved/Shot").await.unwrap(),
                b"img"
            );
        }

        #[tokio::test]
        async fn missing_uri_fails() {
            let err = SaveImageToFileWorker::new(Arc::new(MemoryStore::default()))
                .execute(Data::empty())
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::InvalidInput { .. }));
        }
    }

    #[test]
    fn filesystem_registry_has_all_stages() {
        let registry = filesystem_registry(&PipelineSettings::default());
        for name in [CLEANUP_WORKER, BLUR_WORKER, SAVE_WORKER] {
            assert!(registry.contains(&WorkerName::new(name)), "{name}");
        }
    }
}
