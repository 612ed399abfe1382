//! Network infrastructure: one session per TCP connection.
//!
//! Architecture:
//! - [`session::spawn`] starts the task that reads the socket and drives the
//!   connection state machine.
//! - [`session::SessionControl`] is the shared write side; the facade and the
//!   heartbeat scheduler both write through it.
//! - [`heartbeat::Scheduler`] owns the heartbeat and idle-watchdog tasks of a
//!   connected session.

pub mod heartbeat;
pub mod session;

pub use heartbeat::{ActivityClock, FrameSink, Scheduler, SchedulerConfig};
pub use session::{SessionConfig, SessionControl, SessionEnv};
