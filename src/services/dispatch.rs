use crate::core::{ItemId, MatchSignal};
use crate::services::gateway::MessageRef;
use crate::services::pipeline::Shared;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Notification sent to the given scope.
    Notified { destination: u64 },
    /// At least one side no longer exists; its records were removed.
    CleanedUp { removed: usize },
    /// The grouping has no notification scope.
    NoDestination,
    /// Resolution or delivery failed; the signal is discarded.
    Dropped,
}

/// Turns match signals into notifications, one at a time.
///
/// Starts only after every readiness flag is set and the work queue has
/// drained, so an item that is merely unreconciled never triggers a
/// notification. Signals are never retried.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        self.shared.readiness.wait_for_dispatch().await;
        self.shared.work.wait_drained().await;
        log::info!("Dispatcher started");

        let poll = self.shared.settings.dispatch_poll;
        let cooldown = self.shared.settings.dispatch_cooldown;
        loop {
            tokio::time::sleep(poll).await;
            let Some(signal) = self.shared.matches.pop() else {
                continue;
            };

            let outcome = self.dispatch(signal).await;
            log::debug!("Signal {:?} -> {:?}", signal, outcome);
            self.shared.matches.finish();
            tokio::time::sleep(cooldown).await;
        }
    }

    pub async fn dispatch(&self, signal: MatchSignal) -> DispatchOutcome {
        let scope = match self.shared.gate.scope_info(signal.scope_id).await {
            Ok(scope) => scope,
            Err(e) => {
                log::warn!("Dropping match in scope {}: {}", signal.scope_id, e);
                return DispatchOutcome::Dropped;
            }
        };

        let existing = match self.resolve(signal.existing).await {
            Some(reference) => reference,
            None => return DispatchOutcome::Dropped,
        };
        let duplicate = match self.resolve(signal.duplicate).await {
            Some(reference) => reference,
            None => return DispatchOutcome::Dropped,
        };

        let (existing, duplicate) = match (existing, duplicate) {
            (Some(existing), Some(duplicate)) => (existing, duplicate),
            (existing, duplicate) => {
                let mut stale = Vec::new();
                if existing.is_none() {
                    stale.push(signal.existing);
                }
                if duplicate.is_none() {
                    stale.push(signal.duplicate);
                }
                return self.clean_up(&stale).await;
            }
        };

        let Some(grouping_id) = scope.parent_id else {
            log::warn!("Scope {} has no parent grouping to notify in", scope.scope_id);
            return DispatchOutcome::NoDestination;
        };
        let channel = &self.shared.settings.notify_channel;
        let Some(destination) = self.shared.gate.find_in_grouping(grouping_id, channel).await
        else {
            log::warn!("No #{} channel in grouping {}", channel, grouping_id);
            return DispatchOutcome::NoDestination;
        };

        let text = format!(
            "Repost detected: {} matches {}",
            duplicate.jump_link(),
            existing.jump_link()
        );
        match self
            .shared
            .gateway
            .send_message(destination.scope_id, &text)
            .await
        {
            Ok(()) => DispatchOutcome::Notified {
                destination: destination.scope_id,
            },
            Err(e) => {
                log::warn!("Failed to notify #{}: {}", destination.name, e);
                DispatchOutcome::Dropped
            }
        }
    }

    /// `None` when the gateway call itself failed.
    async fn resolve(&self, id: ItemId) -> Option<Option<MessageRef>> {
        match self
            .shared
            .gateway
            .resolve_message(id.scope_id, id.sequence_id)
            .await
        {
            Ok(reference) => Some(reference),
            Err(e) => {
                log::warn!("Cannot resolve {}: {}", id, e);
                None
            }
        }
    }

    async fn clean_up(&self, stale: &[ItemId]) -> DispatchOutcome {
        let removed: usize = {
            let mut index = self.shared.index.write().await;
            stale.iter().map(|id| index.remove(*id)).sum()
        };
        log::info!(
            "Match refers to deleted message(s) {:?}, removed {} record(s)",
            stale,
            removed
        );
        if removed > 0 {
            if let Err(e) = self.shared.persist_ledger().await {
                log::error!("Failed to save ledger: {}", e);
            }
        }
        DispatchOutcome::CleanedUp { removed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExactIdPolicy, Fingerprint, ScopeInfo};
    use crate::services::archive::{Archive, ArchiveError};
    use crate::services::gateway::{Gateway, GatewayError};
    use crate::services::pipeline::{Pipeline, PipelineSettings};
    use crate::services::store::{KvStore, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct EmptyArchive;

    impl Archive for EmptyArchive {
        fn list_items(&self) -> Result<Vec<String>, ArchiveError> {
            Ok(Vec::new())
        }

        fn read(&self, _path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
            Ok(None)
        }
    }

    struct FakeGateway {
        scopes: Vec<ScopeInfo>,
        live: Mutex<HashSet<u64>>,
        sent: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn scopes(&self) -> Result<Vec<ScopeInfo>, GatewayError> {
            Ok(self.scopes.clone())
        }

        async fn resolve_message(
            &self,
            scope_id: u64,
            message_id: u64,
        ) -> Result<Option<MessageRef>, GatewayError> {
            let live = self.live.lock().unwrap().contains(&message_id);
            Ok(live.then(|| MessageRef::new("https://chat", 1, scope_id, message_id)))
        }

        async fn send_message(&self, scope_id: u64, text: &str) -> Result<(), GatewayError> {
            self.sent.lock().unwrap().push((scope_id, text.to_string()));
            Ok(())
        }
    }

    fn scope(scope_id: u64, parent_id: Option<u64>, name: &str) -> ScopeInfo {
        ScopeInfo {
            scope_id,
            parent_id,
            container_id: 1,
            name: name.to_string(),
        }
    }

    fn setup(
        scopes: Vec<ScopeInfo>,
        live: &[u64],
    ) -> (Dispatcher, Arc<FakeGateway>, Arc<MemoryStore>, Pipeline) {
        let gateway = Arc::new(FakeGateway {
            scopes,
            live: Mutex::new(live.iter().copied().collect()),
            sent: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(
            PipelineSettings::default(),
            Arc::new(EmptyArchive),
            gateway.clone(),
            store.clone(),
            Arc::new(ExactIdPolicy),
        );
        (
            Dispatcher::new(pipeline.shared_for_tests()),
            gateway,
            store,
            pipeline,
        )
    }

    fn signal() -> MatchSignal {
        MatchSignal {
            scope_id: 10,
            existing: ItemId::new(10, 1),
            duplicate: ItemId::new(10, 2),
        }
    }

    async fn seed(pipeline: &Pipeline) {
        let shared = pipeline.shared_for_tests();
        let mut index = shared.index.write().await;
        let print = Fingerprint::from_bytes([3; 32]);
        index.observe("g/10/1-0.png", ItemId::new(10, 1), print);
        index.observe("g/10/2-0.png", ItemId::new(10, 2), print);
    }

    #[tokio::test]
    async fn test_notifies_reposts_channel_with_both_links() {
        let (dispatcher, gateway, _, _) = setup(
            vec![scope(10, Some(5), "memes"), scope(11, Some(5), "reposts")],
            &[1, 2],
        );

        let outcome = dispatcher.dispatch(signal()).await;
        assert_eq!(outcome, DispatchOutcome::Notified { destination: 11 });

        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 11);
        assert!(sent[0].1.contains("https://chat/1/10/2"));
        assert!(sent[0].1.contains("https://chat/1/10/1"));
    }

    #[tokio::test]
    async fn test_deleted_duplicate_is_cleaned_up_without_notifying() {
        let (dispatcher, gateway, store, pipeline) = setup(
            vec![scope(10, Some(5), "memes"), scope(11, Some(5), "reposts")],
            &[1],
        );
        seed(&pipeline).await;

        let outcome = dispatcher.dispatch(signal()).await;
        assert_eq!(outcome, DispatchOutcome::CleanedUp { removed: 1 });
        assert!(gateway.sent.lock().unwrap().is_empty());
        assert!(pipeline.contains("g/10/1-0.png").await);
        assert!(!pipeline.contains("g/10/2-0.png").await);

        let saved = store.load("dupe_hashes").unwrap().unwrap();
        assert!(!saved.contains("g/10/2-0.png"));

        let again = dispatcher.dispatch(signal()).await;
        assert_eq!(again, DispatchOutcome::CleanedUp { removed: 0 });
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_both_sides_deleted_removes_both() {
        let (dispatcher, _, _, pipeline) = setup(
            vec![scope(10, Some(5), "memes"), scope(11, Some(5), "reposts")],
            &[],
        );
        seed(&pipeline).await;

        let outcome = dispatcher.dispatch(signal()).await;
        assert_eq!(outcome, DispatchOutcome::CleanedUp { removed: 2 });
        assert_eq!(pipeline.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_destination_drops_signal() {
        let (dispatcher, gateway, _, _) = setup(
            vec![scope(10, Some(5), "memes"), scope(11, Some(6), "reposts")],
            &[1, 2],
        );

        assert_eq!(dispatcher.dispatch(signal()).await, DispatchOutcome::NoDestination);
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_scope_drops_signal() {
        let (dispatcher, gateway, _, _) = setup(vec![scope(11, Some(5), "reposts")], &[1, 2]);
        assert_eq!(dispatcher.dispatch(signal()).await, DispatchOutcome::Dropped);
        assert!(gateway.sent.lock().unwrap().is_empty());
    }
}
