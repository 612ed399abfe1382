//! Heartbeat timer and idle-timeout watchdog for a connected session.
//!
//! Two tasks run while a session is authenticated:
//!
//! - the **heartbeat** sends a heartbeat request every `heartbeat_interval`,
//!   starting one full interval after the session connects;
//! - the **watchdog** (only when an idle timeout is configured) checks the
//!   session's last-activity time once per `idle_poll_interval` and cancels
//!   the heartbeat once the processor has been silent for longer than the
//!   timeout.  The socket stays open; without heartbeats the processor will
//!   eventually drop it.
//!
//! Both tasks hang off child tokens of the session's [`CancellationToken`],
//! so ending the session ends them too.  [`Scheduler::stop`] additionally
//! waits for both tasks to exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cresnet_core::protocol::messages::HEARTBEAT_REQUEST;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::error::ClientError;

/// Destination for frames written by background tasks.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Writes one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] when no authenticated socket is
    /// available, or [`ClientError::Io`] when the write fails.
    async fn send_frame(&self, frame: &str) -> Result<(), ClientError>;
}

/// Time of the most recent inbound byte.
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<Instant>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Records activity now.
    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn elapsed(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer settings for one [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub heartbeat_interval: Duration,
    pub idle_poll_interval: Duration,
    /// `None` or zero disables the watchdog.
    pub idle_timeout: Option<Duration>,
}

impl SchedulerConfig {
    fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.filter(|t| !t.is_zero())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            idle_poll_interval: Duration::from_secs(1),
            idle_timeout: None,
        }
    }
}

/// Handle to the running heartbeat and watchdog tasks.
#[derive(Debug)]
pub struct Scheduler {
    heartbeat: CancellationToken,
    watchdog: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the heartbeat task, and the watchdog if an idle timeout is set.
    ///
    /// `paused` is read on every tick: while it is `true` the tick sends
    /// nothing, but the timer keeps its cadence.
    pub fn start(
        config: SchedulerConfig,
        sink: Arc<dyn FrameSink>,
        activity: Arc<ActivityClock>,
        paused: Arc<AtomicBool>,
        session: &CancellationToken,
    ) -> Self {
        let heartbeat = session.child_token();
        let watchdog = session.child_token();
        let mut tasks = Vec::with_capacity(2);

        tasks.push(tokio::spawn(heartbeat_loop(
            config.heartbeat_interval,
            sink,
            paused,
            heartbeat.clone(),
        )));

        match config.effective_idle_timeout() {
            Some(timeout) => {
                debug!("idle watchdog armed: timeout {timeout:?}");
                tasks.push(tokio::spawn(watchdog_loop(
                    timeout,
                    config.idle_poll_interval,
                    activity,
                    heartbeat.clone(),
                    watchdog.clone(),
                )));
            }
            None => debug!("idle watchdog disabled"),
        }

        Self {
            heartbeat,
            watchdog,
            tasks,
        }
    }

    /// `true` once heartbeats have stopped for good.
    pub fn heartbeats_stopped(&self) -> bool {
        self.heartbeat.is_cancelled()
    }

    /// Cancels both tasks and waits for them to exit.
    pub async fn stop(self) {
        self.heartbeat.cancel();
        self.watchdog.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("scheduler task ended abnormally: {e}");
            }
        }
    }
}

async fn heartbeat_loop(
    period: Duration,
    sink: Arc<dyn FrameSink>,
    paused: Arc<AtomicBool>,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::Relaxed) {
            debug!("heartbeats paused; skipping tick");
            continue;
        }

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = sink.send_frame(HEARTBEAT_REQUEST) => sent,
        };
        if let Err(e) = sent {
            warn!("heartbeat send failed; stopping heartbeats: {e}");
            token.cancel();
            break;
        }
        debug!("heartbeat request sent");
    }
    debug!("heartbeat task exited");
}

async fn watchdog_loop(
    timeout: Duration,
    poll: Duration,
    activity: Arc<ActivityClock>,
    heartbeat: CancellationToken,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let idle = activity.elapsed();
        if idle > timeout {
            info!("no activity for {idle:?} (timeout {timeout:?}); stopping heartbeats");
            heartbeat.cancel();
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
