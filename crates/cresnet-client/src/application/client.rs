//! The client facade.
//!
//! [`CresnetClient`] owns everything that outlives a single TCP session: the
//! [`StateStore`], the event channel, the connection-state watch and the
//! heartbeat pause flag.  Each call to [`connect`](CresnetClient::connect)
//! (or [`attach`](CresnetClient::attach)) starts one session; at most one is
//! live at a time.
//!
//! Events are published on a `tokio::sync::broadcast` channel.  Decoding
//! never waits for subscribers: a subscriber that falls more than
//! `event_capacity` events behind receives `RecvError::Lagged` and skips
//! ahead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cresnet_core::{encode_data, SignalClass, SignalValue, StateStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::config::ClientConfig;
use crate::domain::error::ClientError;
use crate::domain::events::{ClientEvent, ConnectionState, DisconnectReason};
use crate::infrastructure::network::session::{self, SessionConfig, SessionControl, SessionEnv};

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    task: JoinHandle<Result<DisconnectReason, ClientError>>,
}

impl SessionHandle {
    /// Waits for the session to end.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Authentication`] if the passcode was rejected;
    /// - [`ClientError::Io`] if reading from the socket failed;
    /// - [`ClientError::Task`] if the session task panicked.
    pub async fn join(self) -> Result<DisconnectReason, ClientError> {
        self.task.await?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Async client for one control processor.
///
/// All methods take `&self`; share the client across tasks with an `Arc`.
pub struct CresnetClient {
    config: ClientConfig,
    store: Arc<StateStore>,
    events: broadcast::Sender<ClientEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    heartbeats_paused: Arc<AtomicBool>,
    session: Mutex<Option<Arc<SessionControl>>>,
}

impl CresnetClient {
    /// Creates a disconnected client with an empty store.
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            store: Arc::new(StateStore::new()),
            events,
            state: Arc::new(state),
            heartbeats_paused: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    /// Opens a TCP connection to the processor and starts a session on it.
    ///
    /// Returns once the socket is open; authentication continues in the
    /// background.  Watch for [`ClientEvent::Connected`] or call
    /// [`wait_until_connected`](Self::wait_until_connected).
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionActive`] if a session is already live;
    /// - [`ClientError::ConnectFailed`] if the TCP connect fails.  No retry
    ///   is attempted.
    pub async fn connect(&self) -> Result<SessionHandle, ClientError> {
        self.begin_session()?;
        let addr = self.config.addr();
        info!("connecting to control processor at {addr}");

        let stream = match TcpStream::connect(addr.as_str()).await {
            Ok(stream) => stream,
            Err(source) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::ConnectFailed { addr, source });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }

        let (reader, writer) = stream.into_split();
        Ok(self.start_session(reader, writer))
    }

    /// Starts a session over an already-connected stream.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionActive`] if a session is already live.
    pub fn attach<S>(&self, stream: S) -> Result<SessionHandle, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.begin_session()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(self.start_session(reader, writer))
    }

    /// Connects and waits for the session to end.
    pub async fn run(&self) -> Result<DisconnectReason, ClientError> {
        self.connect().await?.join().await
    }

    /// Ends the live session, if any, and waits for its cleanup to finish.
    ///
    /// Safe to call repeatedly and from any task.
    pub async fn shutdown(&self) {
        let Some(control) = self.current_session() else {
            return;
        };
        if control.request_end(DisconnectReason::Requested) {
            info!("shutdown requested");
        }
        control.finished().await;
    }

    /// Claims the `Disconnected → Connecting` transition atomically.
    fn begin_session(&self) -> Result<(), ClientError> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                claimed = true;
            }
            claimed
        });
        if claimed {
            Ok(())
        } else {
            Err(ClientError::SessionActive)
        }
    }

    fn start_session<R, W>(&self, reader: R, writer: W) -> SessionHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let env = SessionEnv {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            heartbeats_paused: Arc::clone(&self.heartbeats_paused),
        };
        let (control, task) = session::spawn(reader, writer, SessionConfig::from(&self.config), env);
        *self.session_slot() = Some(control);
        SessionHandle { task }
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Arc<SessionControl>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_session(&self) -> Option<Arc<SessionControl>> {
        self.session_slot().clone()
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Sends `value` for signal `id` with the repeat flag set.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless the session is authenticated (no
    /// bytes are written); [`ClientError::Io`] if the socket write fails.
    pub async fn send(&self, id: u32, value: impl Into<SignalValue>) -> Result<(), ClientError> {
        self.send_with_repeat(id, value, true).await
    }

    /// Sends `value` for signal `id` with an explicit repeat flag.
    pub async fn send_with_repeat(
        &self,
        id: u32,
        value: impl Into<SignalValue>,
        repeat: bool,
    ) -> Result<(), ClientError> {
        let value = value.into();
        let frame = encode_data(id, &value, repeat);
        self.write(&[&frame]).await
    }

    /// Sends a value given as text, e.g. from a command line or a bridge.
    ///
    /// `class` is `digital`, `analog` or `serial` (any case).  Both the class
    /// and the value are validated before anything touches the socket.
    ///
    /// # Errors
    ///
    /// [`ClientError::Signal`] for an unknown class or an unparseable value,
    /// otherwise as for [`send`](Self::send).
    pub async fn send_raw(&self, class: &str, id: u32, raw: &str) -> Result<(), ClientError> {
        let class: SignalClass = class.parse()?;
        let value = SignalValue::parse(class, raw)?;
        self.send(id, value).await
    }

    /// Presses and releases digital signal `id`.
    ///
    /// Both frames go out under one writer lock, so concurrent presses never
    /// interleave their `true`/`false` pairs.
    pub async fn press_button(&self, id: u32) -> Result<(), ClientError> {
        let press = encode_data(id, &SignalValue::Digital(true), true);
        let release = encode_data(id, &SignalValue::Digital(false), true);
        self.write(&[&press, &release]).await
    }

    async fn write(&self, frames: &[&str]) -> Result<(), ClientError> {
        let control = self.current_session().ok_or(ClientError::NotConnected)?;
        control.write_frames(frames).await
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Last value received for `(class, id)`; `None` if never observed.
    pub fn last_value(&self, class: SignalClass, id: u32) -> Option<SignalValue> {
        self.store.get(class, id)
    }

    /// Every known signal, ordered by class then id.
    pub fn snapshot(&self) -> Vec<(SignalClass, u32, SignalValue)> {
        self.store.snapshot()
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Waits until the session is authenticated.
    ///
    /// # Errors
    ///
    /// [`ClientError::Timeout`] if `timeout` elapses first.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut rx = self.state.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_connected()))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    // ── Heartbeats ────────────────────────────────────────────────────────────

    /// While paused, heartbeat ticks send nothing.  Applies to the live
    /// session and every later one.
    pub fn set_heartbeats_paused(&self, paused: bool) {
        self.heartbeats_paused.store(paused, Ordering::Relaxed);
        debug!("heartbeats paused: {paused}");
    }

    pub fn heartbeats_paused(&self) -> bool {
        self.heartbeats_paused.load(Ordering::Relaxed)
    }
}

impl Drop for CresnetClient {
    fn drop(&mut self) {
        let slot = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(control) = slot.as_ref() {
            if !control.is_finished() {
                control.request_end(DisconnectReason::Requested);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
