//! Periodic eviction of expired subscriptions.
//!
//! This module contains the ExpirationSweeper which handles:
//! - Running a background task that sweeps the registry at a fixed interval
//! - Graceful shutdown with a bounded wait

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::error::SweeperError;
use crate::registry::CallbackRegistry;

/// How long `shutdown` waits for the background task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Background task evicting expired subscriptions.
///
/// Reads already skip expired subscriptions, so sweeping only bounds memory:
/// an expired entry is physically removed at most one interval after its
/// expiration instant.
///
/// # Shutdown
///
/// The sweeper provides graceful shutdown with a 5-second timeout. Dropping
/// the sweeper without calling `shutdown` detaches the task, which then ends
/// with the runtime.
pub struct ExpirationSweeper {
    /// Handle to the background sweep task
    background_task: Option<JoinHandle<()>>,
    /// Channel for signaling shutdown
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ExpirationSweeper {
    /// Start sweeping `registry` every `sweep_interval`.
    ///
    /// Must be called from within a tokio runtime. A zero interval is treated
    /// as one millisecond.
    pub fn start(registry: CallbackRegistry, sweep_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));

        let background_task = tokio::spawn(Self::sweep_task(registry, sweep_interval, shutdown_rx));

        tracing::debug!(interval_ms = sweep_interval.as_millis() as u64, "expiration sweeper started");

        Self {
            background_task: Some(background_task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stop the sweeper.
    ///
    /// Signals the background task and waits up to 5 seconds for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown times out or the task panicked.
    pub async fn shutdown(mut self) -> Result<(), SweeperError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        if let Some(task) = self.background_task.take() {
            match timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SweeperError::TaskPanicked(e.to_string())),
                Err(_) => Err(SweeperError::ShutdownTimeout(SHUTDOWN_TIMEOUT)),
            }
        } else {
            Ok(())
        }
    }

    async fn sweep_task(
        registry: CallbackRegistry,
        sweep_interval: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = registry.sweep(Instant::now()).await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "swept expired subscriptions");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        tracing::debug!("expiration sweeper stopped");
    }
}
