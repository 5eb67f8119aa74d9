use crate::core::item::has_supported_extension;
use crate::core::{
    AdmissionPolicy, AdmissionSet, DuplicateIndex, IndexError, ItemId, MatchSignal, Readiness,
    WorkQueue,
};
use crate::services::archive::{Archive, ArchiveError};
use crate::services::dispatch::Dispatcher;
use crate::services::gate::{AdmissionError, AdmissionGate};
use crate::services::gateway::Gateway;
use crate::services::ingest::IngestionWorker;
use crate::services::reconcile::Reconciler;
use crate::services::store::{KvStore, StoreError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Index(#[from] IndexError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Background task failed: {message}")]
    Task { message: String },
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task {
            message: err.to_string(),
        }
    }
}

/// Tunables for the pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub supported_formats: Vec<String>,
    pub ledger_key: String,
    pub admission_key: String,
    pub notify_channel: String,
    pub worker_idle: Duration,
    pub dispatch_poll: Duration,
    pub dispatch_cooldown: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            supported_formats: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
            ledger_key: "dupe_hashes".to_string(),
            admission_key: "dupe_scopes".to_string(),
            notify_channel: "reposts".to_string(),
            worker_idle: Duration::from_millis(1000),
            dispatch_poll: Duration::from_millis(1000),
            dispatch_cooldown: Duration::from_millis(5000),
        }
    }
}

/// State shared by the stage tasks.
pub(crate) struct Shared {
    pub settings: PipelineSettings,
    pub index: RwLock<DuplicateIndex>,
    pub work: WorkQueue<String>,
    pub matches: WorkQueue<MatchSignal>,
    pub readiness: Readiness,
    pub gate: AdmissionGate,
    pub archive: Arc<dyn Archive>,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn KvStore>,
    /// Bumped for every ledger snapshot taken.
    pub ledger_generation: AtomicU64,
    /// Generation of the last snapshot written; older snapshots are skipped.
    pub saved_generation: Arc<Mutex<u64>>,
}

impl Shared {
    /// Write the full ledger through the store.
    pub async fn persist_ledger(&self) -> Result<usize, PipelineError> {
        let (ledger, count, generation) = {
            let index = self.index.read().await;
            let generation = self.ledger_generation.fetch_add(1, Ordering::SeqCst) + 1;
            (index.serialize_ledger(), index.len(), generation)
        };
        let store = self.store.clone();
        let key = self.settings.ledger_key.clone();
        let saved_generation = self.saved_generation.clone();
        let written = tokio::task::spawn_blocking(move || {
            let mut saved = saved_generation.lock().map_err(|_| StoreError::Poisoned)?;
            if *saved > generation {
                return Ok::<_, StoreError>(false);
            }
            store.save(&key, &ledger)?;
            *saved = generation;
            Ok(true)
        })
        .await??;
        if written {
            log::debug!("Ledger saved with {} record(s)", count);
        } else {
            log::debug!("Skipped stale ledger snapshot {}", generation);
        }
        Ok(count)
    }

    pub async fn persist_rules(&self, rules: &AdmissionSet) -> Result<(), PipelineError> {
        let store = self.store.clone();
        let key = self.settings.admission_key.clone();
        let text = rules.to_text();
        tokio::task::spawn_blocking(move || store.save(&key, &text)).await??;
        Ok(())
    }
}

/// Join handles of the three stage tasks.
pub struct PipelineHandles {
    pub worker: JoinHandle<()>,
    pub reconciler: JoinHandle<()>,
    pub dispatcher: JoinHandle<()>,
}

impl PipelineHandles {
    /// Stop scheduling every stage. Work in progress is not resumed.
    pub fn abort(&self) {
        self.worker.abort();
        self.reconciler.abort();
        self.dispatcher.abort();
    }
}

/// Duplicate-image detection pipeline.
///
/// Startup sequence: [`load_history`](Self::load_history) and
/// [`mark_gateway_ready`](Self::mark_gateway_ready) in either order, then
/// [`start`](Self::start). Live events go through [`ingest`](Self::ingest)
/// and [`message_deleted`](Self::message_deleted).
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        archive: Arc<dyn Archive>,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn KvStore>,
        policy: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        let gate = AdmissionGate::new(policy, gateway.clone());
        Self {
            shared: Arc::new(Shared {
                settings,
                index: RwLock::new(DuplicateIndex::new()),
                work: WorkQueue::new(),
                matches: WorkQueue::new(),
                readiness: Readiness::new(),
                gate,
                archive,
                gateway,
                store,
                ledger_generation: AtomicU64::new(0),
                saved_generation: Arc::new(Mutex::new(0)),
            }),
        }
    }

    /// Load the admission set and the ledger, then open the history barrier.
    ///
    /// A corrupt ledger is fatal: the barrier stays closed and the error is
    /// returned to the caller.
    pub async fn load_history(&self) -> Result<usize, PipelineError> {
        let store = self.shared.store.clone();
        let ledger_key = self.shared.settings.ledger_key.clone();
        let admission_key = self.shared.settings.admission_key.clone();
        let (ledger, rules) = tokio::task::spawn_blocking(move || {
            Ok::<_, StoreError>((store.load(&ledger_key)?, store.load(&admission_key)?))
        })
        .await??;

        let rules = AdmissionSet::from_text(rules.as_deref().unwrap_or_default());
        log::info!("Loaded {} admission rule(s)", rules.rules().len());
        self.shared.gate.replace_rules(rules).await;

        let count = self
            .shared
            .index
            .write()
            .await
            .load_from_ledger(ledger.as_deref().unwrap_or_default())?;
        log::info!("Loaded {} fingerprint record(s)", count);

        self.shared.readiness.history_loaded.set();
        Ok(count)
    }

    pub fn mark_gateway_ready(&self) {
        if self.shared.readiness.gateway_ready.set() {
            log::info!("Gateway ready");
        }
    }

    /// Spawn the ingestion worker, reconciler and dispatcher.
    pub fn start(&self) -> PipelineHandles {
        PipelineHandles {
            worker: tokio::spawn(IngestionWorker::new(self.shared.clone()).run()),
            reconciler: tokio::spawn(Reconciler::new(self.shared.clone()).run()),
            dispatcher: tokio::spawn(Dispatcher::new(self.shared.clone()).run()),
        }
    }

    /// Start the stages and apply line events from `events` until EOF or until
    /// `shutdown` resolves, then stop and flush the ledger.
    ///
    /// On EOF queued work is finished before the stages stop. Returns the
    /// number of records flushed.
    pub async fn serve<R, F>(&self, events: R, shutdown: F) -> Result<usize, PipelineError>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let handles = self.start();
        tokio::select! {
            applied = async {
                let applied = self.apply_events(events).await;
                self.wait_settled().await;
                applied
            } => log::info!("Event stream closed after {} event(s)", applied),
            _ = shutdown => log::info!("Shutting down"),
        }
        handles.abort();
        self.flush_ledger().await
    }

    /// Apply `new <path>` and `deleted <message id>` lines until EOF.
    /// Returns the number of events that took effect.
    pub async fn apply_events<R: AsyncBufRead + Unpin>(&self, events: R) -> usize {
        let mut lines = events.lines();
        let mut applied = 0;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return applied,
                Err(e) => {
                    log::warn!("Failed to read event: {}", e);
                    return applied;
                }
            };

            let line = line.trim();
            match line.split_once(char::is_whitespace) {
                Some(("new", path)) => {
                    if self.ingest(path.trim()).await {
                        applied += 1;
                    } else {
                        log::debug!("Not queued: {}", path.trim());
                    }
                }
                Some(("deleted", id)) => match id.trim().parse::<u64>() {
                    Ok(message_id) => match self.message_deleted(message_id).await {
                        Ok(_) => applied += 1,
                        Err(e) => log::warn!("Failed to apply deletion of {}: {}", message_id, e),
                    },
                    Err(_) => log::warn!("Invalid message id: {}", id.trim()),
                },
                _ if line.is_empty() => {}
                _ => log::warn!("Unrecognised event: {}", line),
            }
        }
    }

    /// Live ingress for a newly archived item. Returns whether it was queued.
    ///
    /// Items outside admitted scopes are dropped without a trace.
    pub async fn ingest(&self, path: &str) -> bool {
        if !has_supported_extension(path, &self.shared.settings.supported_formats) {
            return false;
        }

        let id = match ItemId::from_path(path) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Ignoring {}: {}", path, e);
                return false;
            }
        };

        match self.shared.gate.admits(id.scope_id).await {
            Ok(true) => {
                self.shared.work.push(path.to_string());
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::warn!("Admission check failed for {}: {}", path, e);
                false
            }
        }
    }

    /// Deletion ingress: forget every record carried by `message_id`.
    pub async fn message_deleted(&self, message_id: u64) -> Result<usize, PipelineError> {
        let removed = self.shared.index.write().await.remove_sequence(message_id);
        if removed > 0 {
            log::info!(
                "Message {} deleted, dropped {} record(s)",
                message_id,
                removed
            );
            self.shared.persist_ledger().await?;
        }
        Ok(removed)
    }

    /// Admit a scope or grouping rule and persist the set.
    pub async fn admit(&self, rule: &str) -> Result<bool, PipelineError> {
        match self.shared.gate.add_rule(rule).await {
            Some(rules) => {
                self.shared.persist_rules(&rules).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Revoke an admission rule and persist the set.
    pub async fn revoke(&self, rule: &str) -> Result<bool, PipelineError> {
        match self.shared.gate.remove_rule(rule).await {
            Some(rules) => {
                self.shared.persist_rules(&rules).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn rules(&self) -> Vec<String> {
        self.shared.gate.rules().await.rules().to_vec()
    }

    pub async fn flush_ledger(&self) -> Result<usize, PipelineError> {
        self.shared.persist_ledger().await
    }

    pub fn readiness(&self) -> &Readiness {
        &self.shared.readiness
    }

    /// Resolve once reconciliation is done and the work queue is idle.
    pub async fn wait_settled(&self) {
        self.shared.readiness.reconciliation_complete.wait().await;
        self.shared.work.wait_drained().await;
    }

    /// Resolve once every queued match signal has been handled.
    pub async fn wait_dispatched(&self) {
        self.shared.matches.wait_drained().await;
    }

    pub fn pending_work(&self) -> usize {
        self.shared.work.len()
    }

    pub fn pending_matches(&self) -> usize {
        self.shared.matches.len()
    }

    pub async fn record_count(&self) -> usize {
        self.shared.index.read().await.len()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.shared.index.read().await.contains_path(path)
    }

    pub async fn ledger(&self) -> String {
        self.shared.index.read().await.serialize_ledger()
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> Arc<Shared> {
        self.shared.clone()
    }
}
