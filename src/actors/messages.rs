//! Message types for actor communication
//!
//! Commands are request/response messages sent to a specific actor via its
//! mpsc channel; responses travel back over oneshot channels. The data plane
//! (the forwarder's bounded queue of [`crate::OutboundMessage`]) is separate
//! from the command channels on purpose: producers must never be able to
//! observe or block on connection state.

use tokio::sync::oneshot;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run one round immediately, bypassing the interval timer.
    ///
    /// Unlike timer rounds, which are fire-and-forget so rounds may overlap,
    /// this waits for every unit of work in the round to finish and then
    /// reports how many were launched. Used for testing and manual refresh.
    TickNow {
        respond_to: oneshot::Sender<usize>,
    },

    /// Update the round interval
    ///
    /// Takes effect immediately. Ignored with a warning while the scheduler
    /// idles (empty process set or zero interval at startup).
    UpdateInterval {
        /// New interval in seconds
        interval_secs: u64,
    },

    /// Gracefully shut down the scheduler
    ///
    /// In-flight units of work are not cancelled; whatever they enqueue
    /// after the forwarder is gone is dropped.
    Shutdown,
}

/// Commands that can be sent to the ForwarderActor
#[derive(Debug)]
pub enum ForwarderCommand {
    /// Get the forwarder's delivery counters
    GetStats {
        respond_to: oneshot::Sender<ForwarderStats>,
    },

    /// Gracefully shut down the forwarder
    ///
    /// The connection is closed if open; messages still queued are dropped.
    Shutdown,
}

/// Delivery counters, the observable signal for shedding and reconnects
#[derive(Debug, Clone, Default)]
pub struct ForwarderStats {
    /// Frames successfully written to the sink
    pub sent: u64,

    /// Messages dropped because the queue was full at requeue time
    pub dropped: u64,

    /// Successful (re)connects to the sink
    pub connects: u64,

    /// Send or connect failures observed
    pub failures: u64,
}
