//! SchedulerActor - fires sampling rounds and fans out per-process work
//!
//! One round per interval tick. Each round spawns one independent task per
//! monitored process; tasks from one round may still be running when the
//! next round fires, and no ordering holds between processes. A failure
//! inside one process's task (sampling error, detection error) abandons
//! that process's round only - it never touches other processes or future
//! rounds.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → per process: sample → detect → assemble → enqueue
//!     ↑
//!     └─── Commands (TickNow, UpdateInterval, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::MonitoredProcess;
use crate::assemble::build_messages;
use crate::detect::{DetectionClient, DetectionRequest};
use crate::sampler::Sampler;

use super::forwarder::ForwarderHandle;
use super::messages::SchedulerCommand;

/// Actor that drives the sampling-detection-forwarding rounds
pub struct SchedulerActor {
    /// The fixed set of processes, resolved once at startup
    processes: Vec<MonitoredProcess>,

    sampler: Arc<dyn Sampler>,

    detector: Arc<dyn DetectionClient>,

    forwarder: ForwarderHandle,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Current round interval
    interval_duration: Duration,
}

impl SchedulerActor {
    pub fn new(
        processes: Vec<MonitoredProcess>,
        interval_duration: Duration,
        sampler: Arc<dyn Sampler>,
        detector: Arc<dyn DetectionClient>,
        forwarder: ForwarderHandle,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            processes,
            sampler,
            detector,
            forwarder,
            command_rx,
            interval_duration,
        }
    }

    /// Run the actor's main loop
    ///
    /// With an empty process set or a zero interval there is nothing to
    /// schedule: the timer never starts and the actor only serves commands,
    /// so the agent idles but still shuts down cleanly.
    #[instrument(skip(self), fields(processes = self.processes.len()))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        if self.processes.is_empty() || self.interval_duration.is_zero() {
            debug!("no work to schedule, idling");
            self.idle().await;
            return;
        }

        // First round fires after one full interval, not immediately.
        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Fire and forget: rounds may overlap when units of work
                    // outlast the interval.
                    self.launch_round();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            let units = self.launch_round();
                            let launched = units.len();
                            for unit in units {
                                let _ = unit.await;
                            }
                            let _ = respond_to.send(launched);
                        }

                        SchedulerCommand::UpdateInterval { interval_secs } => {
                            if interval_secs == 0 {
                                warn!("ignoring zero interval update");
                                continue;
                            }
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs);
                            ticker = interval_at(
                                Instant::now() + self.interval_duration,
                                self.interval_duration,
                            );
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    /// Serve commands without ever starting the timer.
    async fn idle(mut self) {
        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SchedulerCommand::TickNow { respond_to } => {
                    let units = self.launch_round();
                    let launched = units.len();
                    for unit in units {
                        let _ = unit.await;
                    }
                    let _ = respond_to.send(launched);
                }
                SchedulerCommand::UpdateInterval { .. } => {
                    warn!("interval updates have no effect on an idle scheduler");
                }
                SchedulerCommand::Shutdown => break,
            }
        }

        debug!("scheduler actor stopped");
    }

    /// Spawn one unit of work per monitored process and hand back their join
    /// handles. Every round launches the full set, regardless of what failed
    /// in earlier rounds.
    fn launch_round(&self) -> Vec<JoinHandle<()>> {
        trace!("launching round for {} processes", self.processes.len());

        self.processes
            .iter()
            .map(|process| {
                let process = *process;
                let sampler = Arc::clone(&self.sampler);
                let detector = Arc::clone(&self.detector);
                let forwarder = self.forwarder.clone();

                tokio::spawn(async move {
                    run_unit_of_work(process, sampler, detector, forwarder).await;
                })
            })
            .collect()
    }
}

/// One process's share of one round: sample, detect, assemble, enqueue.
///
/// Sampling and detection failures abandon the round for this process only;
/// the next round starts from scratch. Enqueueing never blocks - a full
/// queue sheds the message.
async fn run_unit_of_work(
    process: MonitoredProcess,
    sampler: Arc<dyn Sampler>,
    detector: Arc<dyn DetectionClient>,
    forwarder: ForwarderHandle,
) {
    let samples = match sampler.sample(process.pid) {
        Ok(samples) => samples,
        Err(e) => {
            warn!("abandoning round for pid {}: {e}", process.pid);
            return;
        }
    };

    let request = DetectionRequest::from_samples(&samples);
    let response = match detector.detect(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("abandoning round for pid {}: {e}", process.pid);
            return;
        }
    };

    let predictions = response.prediction_map();
    trace!(
        "pid {}: {} samples, {} predicted types",
        process.pid,
        samples.len(),
        predictions.len()
    );

    for message in build_messages(&samples, &predictions) {
        forwarder.try_enqueue(message);
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor and return a handle to it.
    pub fn spawn(
        processes: Vec<MonitoredProcess>,
        interval_duration: Duration,
        sampler: Arc<dyn Sampler>,
        detector: Arc<dyn DetectionClient>,
        forwarder: ForwarderHandle,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(
            processes,
            interval_duration,
            sampler,
            detector,
            forwarder,
            cmd_rx,
        );

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run one round immediately, waiting for all of its units of work.
    /// Returns the number of units launched.
    pub async fn tick_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("failed to send TickNow command"))?;

        rx.await
            .map_err(|_| anyhow::anyhow!("failed to receive round result"))
    }

    /// Update the round interval
    pub async fn update_interval(&self, interval_secs: u64) -> anyhow::Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval_secs })
            .await
            .map_err(|_| anyhow::anyhow!("failed to send UpdateInterval command"))?;
        Ok(())
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("failed to send Shutdown command"))?;
        Ok(())
    }
}
