//! One TCP session with a control processor.
//!
//! A session is a single task that owns the read half of the socket and an
//! explicit state machine:
//!
//! ```text
//! AwaitingReady ──status 02──▶ (connect delay) ──connect request──▶ Authenticating
//! Authenticating ──code 0──▶ Connected          (update request, heartbeats start)
//! Authenticating ──code ≠ 0──▶ end (AuthenticationRejected)
//! Connected ──data──▶ store + DataChanged
//! any ──disconnectRequest / EOF / read error / end request──▶ end
//! ```
//!
//! The write half lives in [`SessionControl`], shared with the client
//! facade and the heartbeat task.  Every write takes the writer lock once, so
//! the frames of a single call (a button press is two) are never interleaved
//! with anyone else's.
//!
//! # Ending a session
//!
//! Anyone may call [`SessionControl::request_end`]; the first call records
//! the [`DisconnectReason`] and cancels the session token.  Only the session
//! task performs cleanup (stop timers, close the writer, publish
//! `Disconnected`), and it does so exactly once on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cresnet_core::protocol::messages::UPDATE_REQUEST;
use cresnet_core::{
    decode_frame, encode_connect_request, Capabilities, CresnetMessage, FrameDecoder, SignalClass,
    SignalValue, StateStore,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::ClientConfig;
use crate::domain::error::ClientError;
use crate::domain::events::{ClientEvent, ConnectionState, DisconnectReason};
use crate::infrastructure::network::heartbeat::{ActivityClock, FrameSink, Scheduler, SchedulerConfig};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-session settings, derived from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub passcode: String,
    pub capabilities: Capabilities,
    pub connect_delay: Duration,
    pub max_frame_len: usize,
    pub scheduler: SchedulerConfig,
}

impl From<&ClientConfig> for SessionConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            passcode: cfg.passcode.clone(),
            capabilities: cfg.capabilities,
            connect_delay: cfg.connect_delay,
            max_frame_len: cfg.max_frame_len,
            scheduler: SchedulerConfig {
                heartbeat_interval: cfg.heartbeat_interval,
                idle_poll_interval: cfg.idle_poll_interval,
                idle_timeout: cfg.idle_timeout,
            },
        }
    }
}

/// Client-wide state a session reads and publishes into.  Outlives any
/// single session.
#[derive(Clone)]
pub struct SessionEnv {
    pub store: Arc<StateStore>,
    pub events: broadcast::Sender<ClientEvent>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub heartbeats_paused: Arc<AtomicBool>,
}

impl SessionEnv {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("connection state {previous} → {state}");
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

// ── Shared control block ──────────────────────────────────────────────────────

/// The half of a session shared with writers and with whoever may end it.
pub struct SessionControl {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    connected: AtomicBool,
    activity: Arc<ActivityClock>,
    cancel: CancellationToken,
    finished: CancellationToken,
    end_reason: Mutex<Option<DisconnectReason>>,
}

impl SessionControl {
    fn new(writer: BoxedWriter) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(Some(writer)),
            connected: AtomicBool::new(false),
            activity: Arc::new(ActivityClock::new()),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            end_reason: Mutex::new(None),
        }
    }

    /// `true` between authentication and the start of cleanup.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// `true` once the session task has finished cleanup.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Asks the session to end.  Returns `false` if an end was already
    /// requested, in which case the first reason stands.
    pub fn request_end(&self, reason: DisconnectReason) -> bool {
        let mut slot = self.end_reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        drop(slot);
        debug!("session end requested: {reason}");
        self.cancel.cancel();
        true
    }

    /// The reason recorded by the first end request, if any.
    pub fn end_reason(&self) -> Option<DisconnectReason> {
        *self.end_reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once the session task has finished cleanup.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Writes `frames` back to back under one writer lock.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] outside `Connected` (nothing is written)
    /// or when the session ends mid-write; [`ClientError::Io`] if the socket write fails, which also ends the
    /// session with [`DisconnectReason::TransportFailure`].
    pub async fn write_frames(&self, frames: &[&str]) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.write_unchecked(frames).await
    }

    /// Writes regardless of authentication; used by the handshake.
    ///
    /// Waiting for the lock and the write itself both give way to the session
    /// token, so a peer that stops reading cannot hold the writer past the
    /// end of the session.
    async fn write_unchecked(&self, frames: &[&str]) -> Result<(), ClientError> {
        let mut guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ClientError::NotConnected),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("write abandoned: session is ending");
                return Err(ClientError::NotConnected);
            }
            result = write_all_frames(writer, frames) => result,
        };

        if let Err(e) = result {
            warn!("write to processor failed: {e}");
            self.request_end(DisconnectReason::TransportFailure);
            return Err(ClientError::Io(e));
        }
        for frame in frames {
            debug!("sent: {frame}");
        }
        Ok(())
    }

    async fn close_writer(&self) {
        self.connected.store(false, Ordering::Release);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("error closing socket: {e}");
            }
        }
    }
}

async fn write_all_frames(writer: &mut BoxedWriter, frames: &[&str]) -> std::io::Result<()> {
    for frame in frames {
        writer.write_all(frame.as_bytes()).await?;
    }
    writer.flush().await
}

#[async_trait]
impl FrameSink for SessionControl {
    async fn send_frame(&self, frame: &str) -> Result<(), ClientError> {
        self.write_frames(&[frame]).await
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

/// Starts a session over an already-open stream.
///
/// The connection state moves to `AwaitingReady` before this returns.  The
/// task's output is the session outcome: `Ok(reason)` for an orderly end,
/// `Err` for an authentication rejection or a read failure.
pub fn spawn<R, W>(
    reader: R,
    writer: W,
    config: SessionConfig,
    env: SessionEnv,
) -> (Arc<SessionControl>, JoinHandle<Result<DisconnectReason, ClientError>>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let control = Arc::new(SessionControl::new(Box::new(writer)));
    env.set_state(ConnectionState::AwaitingReady);

    let session = Session {
        decoder: FrameDecoder::with_max_frame_len(config.max_frame_len),
        state: ConnectionState::AwaitingReady,
        scheduler: None,
        control: Arc::clone(&control),
        config,
        env,
    };
    let task = tokio::spawn(session.run(reader));
    (control, task)
}

struct Session {
    control: Arc<SessionControl>,
    config: SessionConfig,
    env: SessionEnv,
    decoder: FrameDecoder,
    state: ConnectionState,
    scheduler: Option<Scheduler>,
}

impl Session {
    async fn run<R>(mut self, reader: R) -> Result<DisconnectReason, ClientError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let outcome = self.read_loop(reader).await;

        let fallback = match &outcome {
            Ok(reason) => *reason,
            Err(ClientError::Authentication { .. }) => DisconnectReason::AuthenticationRejected,
            Err(_) => DisconnectReason::TransportFailure,
        };
        self.control.request_end(fallback);
        let reason = self.control.end_reason().unwrap_or(fallback);

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        self.control.close_writer().await;
        self.env.set_state(ConnectionState::Disconnected);
        info!("session ended: {reason}");
        self.env.emit(ClientEvent::Disconnected { reason });
        self.control.finished.cancel();

        outcome.map(|_| reason)
    }

    async fn read_loop<R>(&mut self, mut reader: R) -> Result<DisconnectReason, ClientError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut read_buf = vec![0u8; 4096];
        let cancel = self.control.cancel.clone();

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.ended_by(DisconnectReason::Requested)),
                read = reader.read(&mut read_buf) => match read {
                    Ok(0) => {
                        info!("processor closed the connection");
                        return Ok(self.ended_by(DisconnectReason::ConnectionClosed));
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("read from processor failed: {e}");
                        self.control.request_end(DisconnectReason::TransportFailure);
                        return Err(ClientError::Io(e));
                    }
                },
            };

            self.control.activity.touch();
            self.decoder.push(&read_buf[..n]);

            loop {
                match self.decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if let Some(reason) = self.handle_frame(&frame).await? {
                            return Ok(reason);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => warn!("dropping undecodable input: {e}"),
                }
            }
        }
    }

    /// Records `reason` unless an earlier end request already did, and
    /// returns whichever reason stands.
    fn ended_by(&self, reason: DisconnectReason) -> DisconnectReason {
        self.control.request_end(reason);
        self.control.end_reason().unwrap_or(reason)
    }

    /// Applies one frame.  `Ok(Some(reason))` ends the session.
    async fn handle_frame(&mut self, frame: &str) -> Result<Option<DisconnectReason>, ClientError> {
        debug!("recv: {frame}");
        let message = match decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return Ok(None);
            }
        };

        match (self.state, message) {
            (_, CresnetMessage::DisconnectNotice) => {
                info!("processor requested disconnect");
                return Ok(Some(self.ended_by(DisconnectReason::ProcessorDisconnected)));
            }
            (ConnectionState::AwaitingReady, CresnetMessage::ReadyForConnect) => {
                if !self.send_connect_request().await? {
                    return Ok(Some(self.ended_by(DisconnectReason::Requested)));
                }
            }
            (ConnectionState::Authenticating, CresnetMessage::ConnectAccepted(_)) => {
                self.on_authenticated().await?;
            }
            (ConnectionState::Authenticating, CresnetMessage::ConnectRejected(code)) => {
                warn!("processor rejected the connect request (code {code})");
                self.env.emit(ClientEvent::AuthFailed { code });
                self.control.request_end(DisconnectReason::AuthenticationRejected);
                return Err(ClientError::Authentication { code });
            }
            (ConnectionState::Connected, CresnetMessage::HeartbeatResponse) => {
                debug!("heartbeat response");
                self.env.emit(ClientEvent::HeartbeatObserved);
            }
            (
                ConnectionState::Connected,
                CresnetMessage::DataUpdate {
                    class,
                    id,
                    raw_value,
                },
            ) => self.on_data(class, id, &raw_value),
            (_, CresnetMessage::Unrecognized(raw)) => debug!("ignoring unrecognized frame: {raw}"),
            (state, message) => {
                debug!("ignoring {} while {state}", message.kind());
            }
        }
        Ok(None)
    }

    /// Waits the connect delay, then sends the passcode.  Returns `false` if
    /// the session was ended during the wait.
    async fn send_connect_request(&mut self) -> Result<bool, ClientError> {
        info!("processor ready; sending connect request");
        tokio::select! {
            biased;
            _ = self.control.cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(self.config.connect_delay) => {}
        }

        let request = encode_connect_request(&self.config.passcode, &self.config.capabilities);
        self.control.write_unchecked(&[&request]).await?;
        self.state = ConnectionState::Authenticating;
        self.env.set_state(ConnectionState::Authenticating);
        Ok(true)
    }

    async fn on_authenticated(&mut self) -> Result<(), ClientError> {
        info!("connect request accepted");
        self.control.connected.store(true, Ordering::Release);
        self.state = ConnectionState::Connected;

        self.control.write_frames(&[UPDATE_REQUEST]).await?;

        let sink: Arc<dyn FrameSink> = self.control.clone();
        self.scheduler = Some(Scheduler::start(
            self.config.scheduler.clone(),
            sink,
            Arc::clone(&self.control.activity),
            Arc::clone(&self.env.heartbeats_paused),
            &self.control.cancel,
        ));

        self.env.set_state(ConnectionState::Connected);
        self.env.emit(ClientEvent::Connected);
        Ok(())
    }

    fn on_data(&self, class: SignalClass, id: u32, raw: &str) {
        let value = match SignalValue::parse(class, raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("dropping {class} {id}: {e}");
                return;
            }
        };
        if self.env.store.set(id, value.clone()) {
            debug!("{class} {id} = {value}");
            self.env.emit(ClientEvent::DataChanged { class, id, value });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    struct Harness {
        processor: DuplexStream,
        control: Arc<SessionControl>,
        task: JoinHandle<Result<DisconnectReason, ClientError>>,
        events: broadcast::Receiver<ClientEvent>,
        state: watch::Receiver<ConnectionState>,
        store: Arc<StateStore>,
    }

    fn harness() -> Harness {
        let (client_side, processor) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client_side);
        let (events_tx, events) = broadcast::channel(64);
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let store = Arc::new(StateStore::new());
        let env = SessionEnv {
            store: Arc::clone(&store),
            events: events_tx,
            state: Arc::new(state_tx),
            heartbeats_paused: Arc::new(AtomicBool::new(false)),
        };
        let config = SessionConfig {
            connect_delay: Duration::ZERO,
            ..SessionConfig::from(&ClientConfig::new("test", 1, "1234"))
        };
        let (control, task) = spawn(reader, writer, config, env);
        Harness {
            processor,
            control,
            task,
            events,
            state,
            store,
        }
    }

    const READY: &str = "<cresnet><control><comm><status>02</status></comm></control></cresnet>";
    const ACCEPT: &str =
        "<cresnet><control><comm><connectResponse><code>0</code></connectResponse></comm></control></cresnet>";

    /// Reads from the processor side until `needle` has been seen.
    async fn read_until(processor: &mut DuplexStream, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&seen).contains(needle) {
            let n = processor.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before {needle:?} arrived");
            seen.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(seen).unwrap()
    }

    async fn authenticate(h: &mut Harness) {
        h.processor.write_all(READY.as_bytes()).await.unwrap();
        read_until(&mut h.processor, "</connectRequest>").await;
        h.processor.write_all(ACCEPT.as_bytes()).await.unwrap();
        read_until(&mut h.processor, "<updateRequest>").await;
        h.state.wait_for(|s| s.is_connected()).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_moves_state_to_awaiting_ready() {
        let h = harness();
        assert_eq!(*h.state.borrow(), ConnectionState::AwaitingReady);
        h.control.request_end(DisconnectReason::Requested);
    }

    #[tokio::test]
    async fn test_handshake_sends_passcode_then_update_request() {
        // Arrange
        let mut h = harness();

        // Act
        h.processor.write_all(READY.as_bytes()).await.unwrap();
        let request = read_until(&mut h.processor, "</connectRequest>").await;
        h.processor.write_all(ACCEPT.as_bytes()).await.unwrap();
        let update = read_until(&mut h.processor, "</updateCommand>").await;

        // Assert
        assert!(request.contains("<passcode>1234</passcode>"));
        assert_eq!(update, UPDATE_REQUEST);
        assert_eq!(h.events.recv().await.unwrap(), ClientEvent::Connected);
        assert!(h.control.is_connected());
    }

    #[tokio::test]
    async fn test_data_before_authentication_is_ignored() {
        // Arrange
        let mut h = harness();
        let early = r#"<cresnet><data><bool id="5" value="true"/></data></cresnet>"#;

        // Act
        h.processor.write_all(early.as_bytes()).await.unwrap();
        authenticate(&mut h).await;

        // Assert
        assert_eq!(h.store.get(SignalClass::Digital, 5), None);
    }

    #[tokio::test]
    async fn test_data_changes_are_stored_and_published_once() {
        // Arrange
        let mut h = harness();
        authenticate(&mut h).await;
        assert_eq!(h.events.recv().await.unwrap(), ClientEvent::Connected);
        let frame = r#"<cresnet><data><i32 id="3">75</i32></data></cresnet>"#;

        // Act – same value twice, then a heartbeat response as a marker
        h.processor.write_all(frame.as_bytes()).await.unwrap();
        h.processor.write_all(frame.as_bytes()).await.unwrap();
        h.processor
            .write_all(b"<cresnet><control><comm><heartbeatResponse/></comm></control></cresnet>")
            .await
            .unwrap();

        // Assert
        assert_eq!(
            h.events.recv().await.unwrap(),
            ClientEvent::DataChanged {
                class: SignalClass::Analog,
                id: 3,
                value: SignalValue::Analog(75),
            }
        );
        assert_eq!(h.events.recv().await.unwrap(), ClientEvent::HeartbeatObserved);
        assert_eq!(h.store.get(SignalClass::Analog, 3), Some(SignalValue::Analog(75)));
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_session() {
        let mut h = harness();
        authenticate(&mut h).await;

        h.processor
            .write_all(b"<cresnet><data><i32 id=\"x\">1</i32></data></cresnet>")
            .await
            .unwrap();
        h.processor
            .write_all(br#"<cresnet><data><string id="8">ok</string></data></cresnet>"#)
            .await
            .unwrap();

        loop {
            if let ClientEvent::DataChanged { id, .. } = h.events.recv().await.unwrap() {
                assert_eq!(id, 8);
                break;
            }
        }
        assert!(h.control.is_connected());
    }

    #[tokio::test]
    async fn test_rejected_passcode_ends_with_authentication_error() {
        // Arrange
        let mut h = harness();
        let reject =
            "<cresnet><control><comm><connectResponse><code>1</code></connectResponse></comm></control></cresnet>";

        // Act
        h.processor.write_all(READY.as_bytes()).await.unwrap();
        read_until(&mut h.processor, "</connectRequest>").await;
        h.processor.write_all(reject.as_bytes()).await.unwrap();
        let outcome = h.task.await.unwrap();

        // Assert
        assert!(matches!(outcome, Err(ClientError::Authentication { code: 1 })));
        assert_eq!(h.events.recv().await.unwrap(), ClientEvent::AuthFailed { code: 1 });
        assert_eq!(
            h.events.recv().await.unwrap(),
            ClientEvent::Disconnected {
                reason: DisconnectReason::AuthenticationRejected
            }
        );
        assert_eq!(*h.state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_processor_disconnect_notice_ends_cleanly() {
        let mut h = harness();
        authenticate(&mut h).await;

        h.processor
            .write_all(b"<cresnet><control><comm><disconnectRequest/></comm></control></cresnet>")
            .await
            .unwrap();

        assert_eq!(
            h.task.await.unwrap().unwrap(),
            DisconnectReason::ProcessorDisconnected
        );
        assert!(!h.control.is_connected());
    }

    #[tokio::test]
    async fn test_eof_ends_with_connection_closed() {
        let h = harness();

        drop(h.processor);

        assert_eq!(h.task.await.unwrap().unwrap(), DisconnectReason::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_cleanup_happens_once() {
        // Arrange
        let mut h = harness();
        authenticate(&mut h).await;

        // Act
        assert!(h.control.request_end(DisconnectReason::Requested));
        assert!(!h.control.request_end(DisconnectReason::TransportFailure));
        h.control.finished().await;

        // Assert
        assert_eq!(h.control.end_reason(), Some(DisconnectReason::Requested));
        let mut disconnects = 0;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, ClientEvent::Disconnected { .. }) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        assert_eq!(h.task.await.unwrap().unwrap(), DisconnectReason::Requested);
    }

    #[tokio::test]
    async fn test_writes_before_authentication_fail_without_bytes() {
        // Arrange
        let mut h = harness();

        // Act
        let result = h.control.write_frames(&["<cresnet/>"]).await;
        h.control.request_end(DisconnectReason::Requested);
        h.control.finished().await;
        let mut rest = Vec::new();
        h.processor.read_to_end(&mut rest).await.unwrap();

        // Assert
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert!(rest.is_empty());
    }
}
