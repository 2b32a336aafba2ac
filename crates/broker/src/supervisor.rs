//! Periodic background pass that expires leases and collects old epochs.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Handle to stop and join the supervisor task.
#[derive(Debug)]
pub(crate) struct SupervisorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Run `pass` every `interval` until shut down. The first pass happens one
    /// interval after spawning.
    pub(crate) fn spawn<F, Fut>(interval: Duration, mut pass: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() completes its first tick immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => pass().await,
                }
            }
            debug!("supervisor stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }

    /// Request shutdown and wait for the running pass (if any) to finish.
    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "supervisor task ended abnormally");
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
