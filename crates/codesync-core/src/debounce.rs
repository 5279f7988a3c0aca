//! Delay-and-coalesce trigger used for saving room content

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Quiet period after the last edit before content is saved
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Runs an action once triggers have stopped arriving for `delay`.
///
/// Any number of triggers within `delay` of each other collapse into a single
/// run. A trigger still pending when the debouncer is dropped fires
/// immediately.
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the debouncer task on the current runtime
    pub fn spawn<F, Fut>(delay: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    match tokio::time::timeout(delay, rx.recv()).await {
                        // Re-armed
                        Ok(Some(())) => continue,
                        Ok(None) => {
                            action().await;
                            return;
                        }
                        Err(_) => {
                            action().await;
                            break;
                        }
                    }
                }
            }
        });

        Self { tx, task }
    }

    /// Restart the quiet period
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Stop accepting triggers and wait for a pending run to finish
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}
