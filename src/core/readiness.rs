use tokio::sync::watch;

/// One-shot flag: starts unset, can be set once, never resets.
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Set the latch. Returns `false` if it was already set.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|value| {
            if *value {
                false
            } else {
                *value = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|value| *value).await;
    }
}

/// Startup barriers shared by the pipeline stages.
///
/// Order: gateway ready, then history loaded, then reconciliation complete,
/// and only then may notifications go out.
#[derive(Debug, Default)]
pub struct Readiness {
    pub gateway_ready: Latch,
    pub history_loaded: Latch,
    pub reconciliation_complete: Latch,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until reconciliation may start.
    pub async fn wait_for_reconciliation(&self) {
        self.gateway_ready.wait().await;
        self.history_loaded.wait().await;
    }

    /// Wait until notifications may be dispatched.
    pub async fn wait_for_dispatch(&self) {
        self.wait_for_reconciliation().await;
        self.reconciliation_complete.wait().await;
    }

    pub fn is_fully_ready(&self) -> bool {
        self.gateway_ready.is_set()
            && self.history_loaded.is_set()
            && self.reconciliation_complete.is_set()
    }
}
