use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// A fire-once delay that reports the phase epoch it was armed in.
///
/// The receiver compares the epoch with the session's current one and drops
/// stale firings. Dropping the timer aborts it.
#[derive(Debug, Default)]
pub struct PhaseTimer {
    handle: Option<JoinHandle<()>>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Arm the timer, replacing any pending one.
    pub fn arm(&mut self, epoch: u64, delay: Duration, fired: UnboundedSender<u64>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver may be gone if the phase was torn down.
            let _ = fired.send(epoch);
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!("Cancelling pending phase timer");
            }
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
