use crate::core::ItemId;
use crate::core::item::has_supported_extension;
use crate::services::pipeline::{PipelineError, Shared};
use std::collections::HashMap;
use std::sync::Arc;

/// One-shot startup scan: queue archived images the ledger has never seen.
pub(crate) struct Reconciler {
    shared: Arc<Shared>,
}

impl Reconciler {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        self.shared.readiness.wait_for_reconciliation().await;
        log::info!("Reconciling archive against ledger");

        match self.reconcile().await {
            Ok(queued) => log::info!("Reconciliation queued {} item(s)", queued),
            Err(e) => log::error!("Reconciliation failed: {}", e),
        }

        // Set even on failure so the dispatcher is not held back forever.
        self.shared.readiness.reconciliation_complete.set();
    }

    /// Returns the number of items queued.
    pub async fn reconcile(&self) -> Result<usize, PipelineError> {
        let archive = self.shared.archive.clone();
        let items = tokio::task::spawn_blocking(move || archive.list_items()).await??;
        let total = items.len();

        let candidates: Vec<(String, ItemId)> = {
            let index = self.shared.index.read().await;
            items
                .into_iter()
                .filter(|path| {
                    has_supported_extension(path, &self.shared.settings.supported_formats)
                })
                .filter(|path| !index.contains_path(path))
                .filter_map(|path| match ItemId::from_path(&path) {
                    Ok(id) => Some((path, id)),
                    Err(e) => {
                        log::warn!("Skipping archived item: {}", e);
                        None
                    }
                })
                .collect()
        };
        log::debug!(
            "{} of {} archived item(s) are unhashed images",
            candidates.len(),
            total
        );

        let mut admitted: HashMap<u64, bool> = HashMap::new();
        let mut queued = 0;
        for (path, id) in candidates {
            let allowed = match admitted.get(&id.scope_id) {
                Some(allowed) => *allowed,
                None => {
                    let allowed = match self.shared.gate.admits(id.scope_id).await {
                        Ok(allowed) => allowed,
                        Err(e) => {
                            log::warn!("Admission check failed for scope {}: {}", id.scope_id, e);
                            false
                        }
                    };
                    admitted.insert(id.scope_id, allowed);
                    allowed
                }
            };

            if allowed {
                self.shared.work.push(path);
                queued += 1;
            }
        }

        Ok(queued)
    }
}
