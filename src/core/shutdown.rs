// Cooperative shutdown token
// Cloned into every long-running task; triggering it is idempotent.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown. Safe to call any number of times.
    pub fn trigger(&self) {
        let changed = self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if changed {
            info!("Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Sender is held by `self`
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
