use crate::core::{FingerprintError, ItemId, ItemIdError, MatchSignal, fingerprint};
use crate::services::archive::ArchiveError;
use crate::services::pipeline::Shared;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source vanished before processing: {path}")]
    MissingSource { path: String },

    #[error("Cannot decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: FingerprintError,
    },

    #[error("Invalid item path: {0}")]
    ItemId(#[from] ItemIdError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Fingerprint task failed: {message}")]
    Task { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    Duplicate(MatchSignal),
}

/// Sole consumer of the work queue and sole inserter into the index.
pub(crate) struct IngestionWorker {
    shared: Arc<Shared>,
}

impl IngestionWorker {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        log::info!("Ingestion worker started");
        loop {
            let recorded = self.drain().await;
            if recorded > 0 {
                if let Err(e) = self.shared.persist_ledger().await {
                    log::error!("Failed to save ledger: {}", e);
                }
            }

            let idle = self.shared.settings.worker_idle;
            let _ = tokio::time::timeout(idle, self.shared.work.wait_for_work()).await;
        }
    }

    /// Process everything currently queued. Returns the number of records written.
    pub async fn drain(&self) -> usize {
        let mut recorded = 0;
        while let Some(path) = self.shared.work.pop() {
            match self.process(&path).await {
                Ok(IngestOutcome::Recorded) => recorded += 1,
                Ok(IngestOutcome::Duplicate(signal)) => {
                    recorded += 1;
                    log::info!(
                        "Duplicate in scope {}: {} matches {}",
                        signal.scope_id,
                        signal.duplicate,
                        signal.existing
                    );
                    self.shared.matches.push(signal);
                }
                Err(e) => log::warn!("Skipping {}: {}", path, e),
            }
            self.shared.work.finish();
        }
        recorded
    }

    async fn process(&self, path: &str) -> Result<IngestOutcome, IngestError> {
        let id = ItemId::from_path(path)?;

        let archive = self.shared.archive.clone();
        let owned_path = path.to_string();
        let fingerprinted = tokio::task::spawn_blocking(move || {
            let Some(bytes) = archive.read(&owned_path)? else {
                return Err(IngestError::MissingSource { path: owned_path });
            };
            fingerprint(&bytes).map_err(|source| IngestError::Decode {
                path: owned_path,
                source,
            })
        })
        .await
        .map_err(|e| IngestError::Task {
            message: e.to_string(),
        })??;

        log::debug!("{}={}", path, fingerprinted);
        let existing = self
            .shared
            .index
            .write()
            .await
            .observe(path, id, fingerprinted);

        match existing {
            Some(existing) if existing.sequence_id != id.sequence_id => {
                Ok(IngestOutcome::Duplicate(MatchSignal {
                    scope_id: id.scope_id,
                    existing,
                    duplicate: id,
                }))
            }
            _ => Ok(IngestOutcome::Recorded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExactIdPolicy, ScopeInfo};
    use crate::services::archive::Archive;
    use crate::services::gateway::{Gateway, GatewayError, MessageRef};
    use crate::services::pipeline::{Pipeline, PipelineSettings};
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapArchive {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapArchive {
        fn put(&self, path: &str, bytes: Vec<u8>) {
            self.files.lock().unwrap().insert(path.to_string(), bytes);
        }
    }

    impl Archive for MapArchive {
        fn list_items(&self) -> Result<Vec<String>, ArchiveError> {
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }

        fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
            Ok(self.files.lock().unwrap().get(path).cloned())
        }
    }

    struct NullGateway;

    #[async_trait]
    impl Gateway for NullGateway {
        async fn scopes(&self) -> Result<Vec<ScopeInfo>, GatewayError> {
            Ok(Vec::new())
        }

        async fn resolve_message(
            &self,
            _scope_id: u64,
            _message_id: u64,
        ) -> Result<Option<MessageRef>, GatewayError> {
            Ok(None)
        }

        async fn send_message(&self, _scope_id: u64, _text: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn solid_png(size: u32, colour: [u8; 3]) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb(colour)))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn worker(archive: Arc<MapArchive>) -> (IngestionWorker, Arc<Shared>) {
        let pipeline = Pipeline::new(
            PipelineSettings::default(),
            archive,
            Arc::new(NullGateway),
            Arc::new(MemoryStore::new()),
            Arc::new(ExactIdPolicy),
        );
        let shared = pipeline.shared_for_tests();
        (IngestionWorker::new(shared.clone()), shared)
    }

    #[tokio::test]
    async fn test_first_seen_wins_within_scope() {
        let archive = Arc::new(MapArchive::default());
        for seq in [1, 2, 3] {
            archive.put(&format!("g/7/{}-0.png", seq), solid_png(48, [255, 0, 0]));
        }
        let (worker, shared) = worker(archive);
        for seq in [1, 2, 3] {
            shared.work.push(format!("g/7/{}-0.png", seq));
        }

        assert_eq!(worker.drain().await, 3);
        let first = shared.matches.pop().unwrap();
        let second = shared.matches.pop().unwrap();
        assert!(shared.matches.pop().is_none());
        assert_eq!(first.existing, ItemId::new(7, 1));
        assert_eq!(first.duplicate, ItemId::new(7, 2));
        assert_eq!(second.existing, ItemId::new(7, 1));
        assert_eq!(second.duplicate, ItemId::new(7, 3));
        assert!(shared.work.is_drained());
    }

    #[tokio::test]
    async fn test_attachments_of_one_message_do_not_match_each_other() {
        let archive = Arc::new(MapArchive::default());
        archive.put("g/7/1-0.png", solid_png(32, [0, 255, 0]));
        archive.put("g/7/1-1.png", solid_png(64, [0, 255, 0]));
        let (worker, shared) = worker(archive);
        shared.work.push("g/7/1-0.png".to_string());
        shared.work.push("g/7/1-1.png".to_string());

        assert_eq!(worker.drain().await, 2);
        assert!(shared.matches.is_empty());
        assert_eq!(shared.index.read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reprocessing_same_item_is_silent() {
        let archive = Arc::new(MapArchive::default());
        archive.put("g/7/1-0.png", solid_png(32, [255, 0, 0]));
        let (worker, shared) = worker(archive);
        shared.work.push("g/7/1-0.png".to_string());
        shared.work.push("g/7/1-0.png".to_string());

        worker.drain().await;
        assert!(shared.matches.is_empty());
        assert_eq!(shared.index.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_sources_are_skipped() {
        let archive = Arc::new(MapArchive::default());
        archive.put("g/7/2-0.png", b"not a png".to_vec());
        archive.put("g/7/3-0.png", solid_png(32, [9, 9, 9]));
        let (worker, shared) = worker(archive);
        shared.work.push("g/7/1-0.png".to_string());
        shared.work.push("g/7/2-0.png".to_string());
        shared.work.push("g/7/3-0.png".to_string());

        assert_eq!(worker.drain().await, 1);
        let index = shared.index.read().await;
        assert!(index.contains_path("g/7/3-0.png"));
        assert!(!index.contains_path("g/7/1-0.png"));
        assert!(!index.contains_path("g/7/2-0.png"));
        assert!(shared.work.is_drained());
    }

    #[tokio::test]
    async fn test_process_reports_missing_source() {
        let archive = Arc::new(MapArchive::default());
        let (worker, _) = worker(archive);
        assert!(matches!(
            worker.process("g/7/1-0.png").await,
            Err(IngestError::MissingSource { .. })
        ));
    }
}
