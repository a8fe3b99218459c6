//! Periodic background reclamation for log-structured backends.
//!
//! On every tick the task drains the backend's reclamation primitive: it
//! calls it repeatedly until it reports nothing left, but never more than
//! `max_rounds` times per tick so a backend that keeps producing garbage
//! cannot pin a blocking thread forever. Failures are handed to an
//! [`ErrorSink`] and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Outcome of one reclamation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Something was reclaimed; another round may find more.
    Progress(usize),
    /// Nothing left to reclaim this tick.
    Nothing,
}

/// A backend's blocking reclamation primitive.
pub trait Reclaimer: Send + Sync + 'static {
    fn reclaim(&self) -> Result<Reclaim>;
}

/// Receives maintenance failures.
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

/// Sink that logs each failure at `error` level.
pub fn log_sink(driver: &'static str) -> ErrorSink {
    Arc::new(move |err: &Error| {
        error!(driver, error = %err, "Maintenance round failed");
    })
}

/// Summary of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Drain {
    pub rounds: usize,
    pub reclaimed: usize,
    /// The round cap was reached before the reclaimer reported `Nothing`.
    pub capped: bool,
}

/// Run `reclaimer` until it reports [`Reclaim::Nothing`] or `max_rounds`
/// rounds have made progress.
///
/// # Errors
///
/// Stops at and returns the first round error.
pub fn drain(reclaimer: &dyn Reclaimer, max_rounds: usize) -> Result<Drain> {
    let mut summary = Drain::default();
    while summary.rounds < max_rounds {
        summary.rounds += 1;
        match reclaimer.reclaim()? {
            Reclaim::Progress(n) => summary.reclaimed += n,
            Reclaim::Nothing => return Ok(summary),
        }
    }
    summary.capped = true;
    Ok(summary)
}

/// Timing for a [`MaintenanceTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub max_rounds: usize,
}

/// Handle to a running maintenance loop.
pub struct MaintenanceTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// The first drain happens one full interval after spawning, so `start`
    /// never waits on reclamation.
    pub fn spawn(
        driver: &'static str,
        reclaimer: Arc<dyn Reclaimer>,
        schedule: Schedule,
        sink: ErrorSink,
    ) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + schedule.interval, schedule.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(driver, interval = ?schedule.interval, max_rounds = schedule.max_rounds, "Maintenance task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    // Fires on shutdown and when the handle is dropped.
                    _ = stopped.changed() => break,
                }

                let reclaimer = Arc::clone(&reclaimer);
                let max_rounds = schedule.max_rounds;
                let outcome =
                    tokio::task::spawn_blocking(move || drain(reclaimer.as_ref(), max_rounds))
                        .await
                        .map_err(Error::from)
                        .and_then(|r| r);

                match outcome {
                    Ok(summary) if summary.capped => {
                        warn!(
                            driver,
                            rounds = summary.rounds,
                            reclaimed = summary.reclaimed,
                            "Reclamation hit the round cap; resuming next tick"
                        );
                    },
                    Ok(summary) => {
                        debug!(
                            driver,
                            rounds = summary.rounds,
                            reclaimed = summary.reclaimed,
                            "Reclamation drained"
                        );
                    },
                    Err(err) => sink(&err),
                }
            }

            debug!(driver, "Maintenance task stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the loop and wait for an in-flight drain to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            error!(error = %err, "Maintenance task panicked");
        }
    }
}
