//! Session host supervisor.
//!
//! The supervisor runs as a background task that periodically sweeps the
//! session hosts: it force-terminates hosts that overstayed a status,
//! removes hosts that exited, replaces them and persists the state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::lifecycle::{SessionHostsManager, SweepReport};

/// Periodic sweeper for a [`SessionHostsManager`].
pub struct Supervisor {
    manager: Arc<SessionHostsManager>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    /// Create a supervisor ticking at the configured sweep interval.
    pub fn new(manager: Arc<SessionHostsManager>, shutdown_rx: watch::Receiver<bool>) -> Self {
        let interval = manager.context().settings.sweep_interval();
        Self {
            manager,
            interval,
            shutdown_rx,
        }
    }

    /// Override the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the supervisor loop.
    ///
    /// Runs until shutdown is signaled, then saves the state one last time.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        // Don't catch up on missed ticks
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "supervisor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.manager.sweep().await;
                    log_report(&report);
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        tracing::info!("supervisor shutting down");
                        break;
                    }
                }
            }
        }

        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || manager.save()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to persist state on shutdown"),
            Err(e) => tracing::warn!(error = %e, "failed to persist state on shutdown"),
        }
    }
}

fn log_report(report: &SweepReport) {
    if report.expired.is_empty() && report.exited.is_empty() && report.created == 0 {
        return;
    }
    tracing::info!(
        expired = report.expired.len(),
        exited = report.exited.len(),
        created = report.created,
        too_many_restarts = report.too_many_restarts,
        "sweep finished"
    );
}
