use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Cooperative cancellation token observed at every suspension point.
///
/// Engines check `is_cancelled` between operations and race `cancelled`
/// against sleeps, so a Ctrl-C returns control at the next safe boundary
/// with the current checkpoint already committed.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Wire the token to Ctrl-C for the lifetime of the process.
    pub fn listen_for_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing the current operation");
                token.cancel();
            }
        });
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
