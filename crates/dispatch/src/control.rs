//! Run controls shared between a dispatch and whoever started it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cancel, pause and resume handle for one dispatch. Clones share state.
///
/// Workers consult it before every batch. A paused run lets its in-flight
/// batches finish and then waits; a cancelled run skips every email not
/// yet sent.
#[derive(Debug, Clone)]
pub struct DispatchControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for DispatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `false` if the run was already paused.
    pub fn pause(&self) -> bool {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Wait while the run is paused. Returns `false` once it is cancelled.
    pub async fn proceed(&self) -> bool {
        let mut paused = self.paused.subscribe();
        let resumed = async move {
            // The sender lives in `self`, so this only ends on resume.
            let _ = paused.wait_for(|paused| !*paused).await;
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = resumed => {}
        }
        !self.cancel.is_cancelled()
    }
}
