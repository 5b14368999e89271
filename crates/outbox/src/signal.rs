use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the relay after a commit that appended envelopes.
///
/// A notification sent while nobody waits is remembered, so a commit that
/// lands between two relay ticks is never missed. Clones share one signal.
#[derive(Debug, Clone, Default)]
pub struct CommitSignal(Arc<Notify>);

impl CommitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that new envelopes are ready to be claimed.
    pub fn notify(&self) {
        self.0.notify_one();
    }

    /// Waits for the next signal.
    pub async fn notified(&self) {
        self.0.notified().await;
    }
}
