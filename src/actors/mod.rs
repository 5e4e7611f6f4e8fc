//! Actor-based sampling and forwarding pipeline
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │  Agent (main)   │
//!                  └────────┬────────┘
//!                           │ spawns
//!                  ┌────────▼────────┐
//!                  │   Scheduler     │ ticks every interval
//!                  └────────┬────────┘
//!                           │ one task per monitored process, per round
//!          ┌────────────────┼────────────────┐
//!          │                │                │
//!  ┌───────▼───────┐┌───────▼───────┐┌───────▼───────┐
//!  │ unit of work  ││ unit of work  ││ unit of work  │
//!  │ (pid A)       ││ (pid B)       ││ (pid N)       │
//!  │ sample→detect ││ sample→detect ││ sample→detect │
//!  └───────┬───────┘└───────┬───────┘└───────┬───────┘
//!          │                │                │
//!          └────────────────┼────────────────┘
//!                           │ try_send (never blocks)
//!                 ┌─────────▼──────────┐
//!                 │   Bounded Queue    │ (MPSC, drops on overflow)
//!                 └─────────┬──────────┘
//!                           │ single consumer
//!                 ┌─────────▼──────────┐
//!                 │     Forwarder      │ connect / backoff / send
//!                 └─────────┬──────────┘
//!                           │ one WebSocket connection
//!                      streaming sink
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: fires one round per interval; each round fans out
//!   one independent unit of work per monitored process
//! - **ForwarderActor**: the single writer on the sink connection; owns
//!   reconnect and backoff state
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control
//!    messages, with oneshot channels for request/response
//! 2. **Data**: units of work push wire-ready messages into the forwarder's
//!    bounded queue with a non-blocking send; when the sink is down for
//!    long, the queue sheds load instead of stalling the schedule

pub mod forwarder;
pub mod messages;
pub mod scheduler;
