//! SchedulerActor - Drives flush and retention cycles
//!
//! ## Responsibilities
//!
//! 1. **Periodic flush** - Drains the aggregator every flush interval
//! 2. **Periodic retention** - Purges expired buckets every retention interval
//! 3. **Command-based control** - Flush now, sweep now, stats, shutdown
//!
//! Cycles run as spawned tasks so the actor keeps answering commands while
//! storage is slow. The [`FlushScheduler`] locks keep at most one flush and
//! one sweep in flight; ticks that find one running are skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use super::messages::SchedulerCommand;
use crate::config::FlushConfig;
use crate::flush::{FlushReport, FlushScheduler, FlushStats};
use crate::util::now_millis;

/// Actor owning the flush and retention timers
pub struct SchedulerActor {
    scheduler: Arc<FlushScheduler>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    flush_interval: Duration,
    retention_interval: Duration,

    /// Cycles currently running
    cycles: JoinSet<()>,
}

impl SchedulerActor {
    pub fn new(
        scheduler: Arc<FlushScheduler>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        config: &FlushConfig,
    ) -> Self {
        debug!(
            "creating scheduler actor: flush every {:?}, retention every {:?}",
            config.interval(),
            config.retention_interval()
        );

        Self {
            scheduler,
            command_rx,
            flush_interval: config.interval(),
            retention_interval: config.retention_interval(),
            cycles: JoinSet::new(),
        }
    }

    /// Run the actor's main loop
    ///
    /// This runs until a Shutdown command is received or every handle is
    /// dropped; both end with a final flush.
    #[instrument(skip(self), name = "scheduler")]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut flush_ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut retention_ticker = interval_at(
            Instant::now() + self.retention_interval,
            self.retention_interval,
        );
        retention_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                _ = flush_ticker.tick() => {
                    let scheduler = Arc::clone(&self.scheduler);
                    self.cycles.spawn(async move {
                        scheduler.try_flush().await;
                    });
                }

                _ = retention_ticker.tick() => {
                    let scheduler = Arc::clone(&self.scheduler);
                    self.cycles.spawn(async move {
                        // failures are logged by the scheduler
                        let _ = scheduler.try_retention(now_millis()).await;
                    });
                }

                Some(finished) = self.cycles.join_next(), if !self.cycles.is_empty() => {
                    if let Err(e) = finished {
                        error!("scheduler cycle panicked: {}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        SchedulerCommand::Flush { respond_to } => {
                            debug!("received Flush command");
                            let scheduler = Arc::clone(&self.scheduler);
                            self.cycles.spawn(async move {
                                let report = scheduler.flush().await;
                                let _ = respond_to.send(report);
                            });
                        }

                        SchedulerCommand::RunRetention { now_millis, respond_to } => {
                            debug!("received RunRetention command");
                            let scheduler = Arc::clone(&self.scheduler);
                            self.cycles.spawn(async move {
                                let result = scheduler.run_retention(now_millis).await;
                                let _ = respond_to.send(result);
                            });
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.scheduler.stats());
                        }

                        SchedulerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            shutdown_reply = Some(respond_to);
                            break;
                        }
                    }
                }
            }
        }

        let report = self.drain().await;
        if let Some(respond_to) = shutdown_reply {
            let _ = respond_to.send(report);
        }

        debug!("scheduler actor stopped");
    }

    /// Wait for running cycles, flush what is left and close storage
    async fn drain(&mut self) -> FlushReport {
        while let Some(finished) = self.cycles.join_next().await {
            if let Err(e) = finished {
                error!("scheduler cycle panicked: {}", e);
            }
        }

        let report = self.scheduler.flush().await;
        if report.retried > 0 {
            warn!(
                "{} aggregates could not be persisted before shutdown",
                report.retried
            );
        }

        let persistence = self.scheduler.persistence();
        match persistence.close().await {
            Ok(()) => info!("{} storage closed", persistence.name()),
            Err(e) => error!("failed to close {} storage: {}", persistence.name(), e),
        }

        report
    }
}

/// Handle for controlling a SchedulerActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(scheduler: Arc<FlushScheduler>, config: &FlushConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(scheduler, cmd_rx, config);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Flush immediately, bypassing the interval timer
    pub async fn flush(&self) -> Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive flush report")
    }

    /// Run a retention sweep now
    pub async fn run_retention(&self) -> Result<u64> {
        self.run_retention_at(now_millis()).await
    }

    /// Run a retention sweep with the cutoff computed from `now_millis`
    pub async fn run_retention_at(&self, now_millis: i64) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunRetention {
                now_millis,
                respond_to: tx,
            })
            .await
            .context("failed to send RunRetention command")?;

        let deleted = rx.await.context("failed to receive retention result")??;
        Ok(deleted)
    }

    pub async fn get_stats(&self) -> Result<FlushStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive stats")
    }

    /// Gracefully shut down the scheduler
    ///
    /// Resolves once the final flush is done and storage is closed.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive final flush report")
    }
}
