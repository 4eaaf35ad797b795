use std::sync::Arc;
use tokio::sync::watch;

/// One-shot stop flag that any number of tasks can wait on.
///
/// Used both for the process-wide shutdown and for stopping a single
/// transfer's byte stream.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only ends on a trigger
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
