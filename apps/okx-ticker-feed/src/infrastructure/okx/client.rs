//! OKX Feed Client
//!
//! Owns one session against the OKX public feed: a tokio task (the service
//! loop) that drives a `Transport`, runs the liveness watchdog, parses
//! inbound frames, dispatches ticker records and drains the send queue.
//!
//! # State Machine
//!
//! ```text
//! Disconnected --connect--> Connecting --established--> Established
//!      ^                        |                            |
//!      |                   closed/error               closed/error/timeout
//!      |                        v                            v
//!      +----budget spent---- backoff wait <------------------+
//!      |
//!      +---- Closing <--disconnect-- (any)
//! ```
//!
//! Caller-facing methods never touch the transport. They flip flags or
//! enqueue frames; the service loop observes them on its next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{DEFAULT_PING_INTERVAL, HeartbeatEvent, HeartbeatMonitor};
use super::messages::{ControlEvent, OperationRequest, decode_control};
use super::parser::parse_tickers;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    CloseKind, FrameKind, Transport, TransportError, TransportEvent, TransportFactory,
};
use crate::application::services::{SendQueue, TickerDispatcher};
use crate::domain::connection::{ConnectTarget, ConnectionState, Endpoint, ProxySettings};
use crate::domain::subscription::{Subscription, SubscriptionRegistry};
use crate::domain::ticker::TickerRecord;
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics::{self, ConnectionErrorKind, FrameOutcome};

/// Upper bound on one `Transport::service` call. The watchdog runs at
/// least this often.
pub const SERVICE_TICK: Duration = Duration::from_millis(50);

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned to callers of `FeedClient`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// A session is already running; disconnect first.
    #[error("a session is already running")]
    AlreadyRunning,

    /// `connect` was called outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The transport refused to start connecting.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An outbound request could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// Shared State
// =============================================================================

/// State visible to both the caller and the service loop.
///
/// The `state` lock also orders caller admission against teardown: callers
/// queue frames and record subscriptions while holding a read guard on an
/// established state, and teardown clears them under the write guard.
struct Shared {
    connected: AtomicBool,
    state: RwLock<ConnectionState>,
    auto_reconnect: AtomicBool,
    ping_interval_ms: AtomicU64,
    reconnect_attempts: AtomicU32,
    proxy: RwLock<Option<ProxySettings>>,
    reconnect: ReconnectConfig,
    queue: SendQueue,
    dispatcher: TickerDispatcher,
    subscriptions: SubscriptionRegistry,
}

impl Shared {
    fn new(settings: &ConnectionSettings) -> Self {
        let ping_interval = if settings.ping_interval.is_zero() {
            tracing::warn!(
                default_secs = DEFAULT_PING_INTERVAL.as_secs(),
                "Ignoring zero ping interval, using default"
            );
            DEFAULT_PING_INTERVAL
        } else {
            settings.ping_interval
        };

        Self {
            connected: AtomicBool::new(false),
            state: RwLock::new(ConnectionState::Disconnected),
            auto_reconnect: AtomicBool::new(settings.auto_reconnect),
            ping_interval_ms: AtomicU64::new(duration_millis(ping_interval).max(1)),
            reconnect_attempts: AtomicU32::new(0),
            proxy: RwLock::new(None),
            reconnect: ReconnectConfig::from_connection_settings(settings),
            queue: SendQueue::new(),
            dispatcher: TickerDispatcher::new(),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut slot = self.state.write();
        self.transition(&mut slot, state);
    }

    fn transition(&self, slot: &mut ConnectionState, state: ConnectionState) {
        let previous = std::mem::replace(slot, state);
        self.connected
            .store(state.is_established(), Ordering::Release);

        if previous != state {
            metrics::set_connected(state.is_established());
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Go to `Disconnected` and drop queued frames, plus the subscription
    /// registry when `forget_subscriptions` is set. No caller can queue
    /// between the state change and the clearing.
    fn settle_disconnected(&self, forget_subscriptions: bool) {
        let mut slot = self.state.write();
        self.transition(&mut slot, ConnectionState::Disconnected);
        self.abandon_queue();
        if forget_subscriptions {
            self.subscriptions.clear();
        }
    }

    /// Admit a caller operation. The guard must be held until the
    /// operation's frame is queued.
    fn admit(&self) -> Result<RwLockReadGuard<'_, ConnectionState>, ClientError> {
        let state = self.state.read();
        if state.is_established() {
            Ok(state)
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.load(Ordering::Relaxed))
    }

    fn target(&self, endpoint: &Endpoint) -> ConnectTarget {
        ConnectTarget {
            endpoint: endpoint.clone(),
            proxy: self.proxy.read().clone(),
        }
    }

    fn enqueue(&self, frame: String) {
        self.queue.enqueue(frame);
        metrics::set_send_queue_depth(self.queue.len());
    }

    fn abandon_queue(&self) {
        let dropped = self.queue.clear();
        metrics::set_send_queue_depth(0);
        if dropped > 0 {
            tracing::warn!(dropped, "Abandoned queued frames");
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Feed Client
// =============================================================================

struct Session {
    cancel: CancellationToken,
    finished: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client for the OKX public ticker feed.
///
/// One client runs at most one session at a time. The client is `Sync`;
/// wrap it in an `Arc` to share it between tasks.
///
/// # Example
///
/// ```no_run
/// use okx_ticker_feed::domain::connection::Endpoint;
/// use okx_ticker_feed::infrastructure::okx::{FeedClient, WsTransport};
///
/// # async fn run() -> Result<(), okx_ticker_feed::infrastructure::okx::ClientError> {
/// let client = FeedClient::new(WsTransport::boxed);
/// client.set_ticker_callback(|ticker| println!("{} {}", ticker.inst_id, ticker.last));
/// client.connect(Endpoint::okx_public())?;
/// # Ok(())
/// # }
/// ```
pub struct FeedClient {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    session: Mutex<Option<Session>>,
}

impl FeedClient {
    /// Create a client with default connection settings.
    #[must_use]
    pub fn new(factory: impl TransportFactory + 'static) -> Self {
        Self::with_settings(factory, &ConnectionSettings::default())
    }

    /// Create a client with explicit connection settings.
    #[must_use]
    pub fn with_settings(
        factory: impl TransportFactory + 'static,
        settings: &ConnectionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings)),
            factory: Arc::new(factory),
            session: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start a session against `endpoint`.
    ///
    /// Returns once the transport has started connecting; the connection is
    /// usable when `is_connected` turns true. Any configured proxy is read
    /// here and again before each reconnect.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if a session is live
    /// - `NoRuntime` if called outside a tokio runtime
    /// - `Transport` if the transport cannot start connecting
    pub fn connect(&self, endpoint: Endpoint) -> Result<(), ClientError> {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| !s.finished.is_cancelled()) {
            return Err(ClientError::AlreadyRunning);
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let target = self.shared.target(&endpoint);
        let mut transport = self.factory.create();
        transport.open(&target)?;

        tracing::info!(
            url = %endpoint.url(),
            proxy = ?target.proxy.as_ref().map(ProxySettings::authority),
            "Connecting to OKX feed"
        );

        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
        self.shared.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let service = ServiceLoop {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
            heartbeat: HeartbeatMonitor::new(self.shared.ping_interval(), Instant::now()),
            policy: ReconnectPolicy::new(self.shared.reconnect.clone()),
            endpoint,
            transport,
            cancel: cancel.clone(),
        };
        let handle = runtime.spawn(service.run(finished.clone()));

        *session = Some(Session {
            cancel,
            finished,
            handle,
        });
        Ok(())
    }

    /// End the session: stop the service loop, close the transport, drop
    /// queued frames and forget subscriptions. No reconnect follows.
    ///
    /// Idempotent; returns once the service loop has exited.
    pub async fn disconnect(&self) {
        let session = self.session.lock().take();

        if let Some(session) = session {
            self.shared.set_state(ConnectionState::Closing);
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                tracing::error!(error = %e, "Service loop terminated abnormally");
            }
            tracing::info!("Disconnected from OKX feed");
        }

        self.shared.settle_disconnected(true);
    }

    /// Wait until the service loop exits, either after `disconnect` or
    /// after the reconnect budget is spent. Returns immediately when no
    /// session was started.
    pub async fn wait_stopped(&self) {
        let finished = self.session.lock().as_ref().map(|s| s.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Subscribe to tickers for `inst_id`.
    ///
    /// The request is queued; the acknowledgment is not awaited. Accepted
    /// subscriptions are replayed after an automatic reconnect.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless the connection is established. Nothing is
    /// queued in that case.
    pub fn subscribe(&self, inst_id: &str) -> Result<(), ClientError> {
        let _admitted = self.shared.admit()?;

        let subscription = Subscription::tickers(inst_id);
        let frame = OperationRequest::subscribe(&subscription).to_frame()?;
        self.shared.enqueue(frame);

        if !self.shared.subscriptions.insert(subscription) {
            tracing::debug!(inst_id, "Already subscribed, request re-sent");
        }
        tracing::info!(inst_id, "Subscription requested");
        Ok(())
    }

    /// Unsubscribe from tickers for `inst_id`.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless the connection is established.
    pub fn unsubscribe(&self, inst_id: &str) -> Result<(), ClientError> {
        let _admitted = self.shared.admit()?;

        let subscription = Subscription::tickers(inst_id);
        let frame = OperationRequest::unsubscribe(&subscription).to_frame()?;
        self.shared.enqueue(frame);
        self.shared.subscriptions.remove(&subscription);

        tracing::info!(inst_id, "Unsubscription requested");
        Ok(())
    }

    /// Queue a raw text frame.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless the connection is established.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), ClientError> {
        let _admitted = self.shared.admit()?;
        self.shared.enqueue(frame.into());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Consumer and settings
    // -------------------------------------------------------------------------

    /// Register the ticker consumer, replacing any previous one.
    ///
    /// The callback runs on the service loop. It must return quickly: while
    /// it runs, no frames are read, written or pinged.
    pub fn set_ticker_callback<F>(&self, callback: F)
    where
        F: Fn(&TickerRecord) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_callback(callback);
    }

    /// Remove the ticker consumer.
    pub fn clear_ticker_callback(&self) {
        self.shared.dispatcher.clear_callback();
    }

    /// Enable or disable automatic reconnection.
    pub fn enable_auto_reconnect(&self, enabled: bool) {
        self.shared.auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Check if automatic reconnection is enabled.
    #[must_use]
    pub fn auto_reconnect_enabled(&self) -> bool {
        self.shared.auto_reconnect.load(Ordering::Relaxed)
    }

    /// Change the liveness ping interval. Applies from the next tick.
    /// A zero interval is ignored.
    pub fn set_ping_interval(&self, interval: Duration) {
        if interval.is_zero() {
            tracing::warn!("Ignoring zero ping interval");
            return;
        }
        self.shared
            .ping_interval_ms
            .store(duration_millis(interval).max(1), Ordering::Relaxed);
    }

    /// Current liveness ping interval.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.shared.ping_interval()
    }

    /// Route future connects through `proxy`.
    pub fn set_proxy(&self, proxy: ProxySettings) {
        *self.shared.proxy.write() = Some(proxy);
    }

    /// Connect directly from now on.
    pub fn clear_proxy(&self) {
        *self.shared.proxy.write() = None;
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Check if the connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Check if a session is live: connected, connecting, or waiting out a
    /// reconnect backoff. False once the reconnect budget is spent.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.finished.is_cancelled())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Subscriptions that would be replayed on reconnect.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.subscriptions.snapshot()
    }

    /// Frames waiting to be written.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Reconnect attempts since the last established connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::Relaxed)
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("state", &self.state())
            .field("subscriptions", &self.shared.subscriptions.len())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Service Loop
// =============================================================================

/// Why an established (or connecting) transport was given up.
#[derive(Debug)]
enum Loss {
    Closed,
    Error(String),
    PongTimeout,
}

enum Exit {
    Cancelled,
    Lost(Loss),
}

struct ServiceLoop {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    heartbeat: HeartbeatMonitor,
    policy: ReconnectPolicy,
    endpoint: Endpoint,
    transport: Box<dyn Transport>,
    cancel: CancellationToken,
}

impl ServiceLoop {
    async fn run(mut self, finished: CancellationToken) {
        loop {
            match self.pump().await {
                Exit::Cancelled => {
                    self.transport.close(CloseKind::Normal).await;
                    break;
                }
                Exit::Lost(loss) => {
                    self.tear_down(loss).await;
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        finished.cancel();
        tracing::debug!("Service loop exited");
    }

    /// Service the current transport until it is lost or the session ends.
    async fn pump(&mut self) -> Exit {
        loop {
            if self.shared.is_connected()
                && let Some(loss) = self.watchdog().await
            {
                return Exit::Lost(loss);
            }

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Exit::Cancelled,

                () = self.shared.queue.wait_for_frames() => {
                    self.transport.request_writable();
                }

                event = self.transport.service(SERVICE_TICK) => {
                    if let Some(event) = event
                        && let Some(loss) = self.handle_event(event).await
                    {
                        return Exit::Lost(loss);
                    }
                }
            }
        }
    }

    async fn watchdog(&mut self) -> Option<Loss> {
        let interval = self.shared.ping_interval();
        if interval != self.heartbeat.ping_interval() {
            self.heartbeat.set_ping_interval(interval);
        }

        let now = Instant::now();
        match self.heartbeat.check(now)? {
            HeartbeatEvent::SendPing => {
                match self.transport.write(&[], FrameKind::Ping).await {
                    Ok(()) => {
                        self.heartbeat.record_ping(now);
                        tracing::trace!("Sent ping");
                    }
                    Err(e) => tracing::debug!(error = %e, "Ping write failed"),
                }
                None
            }
            HeartbeatEvent::Timeout => {
                tracing::warn!(
                    since_pong_ms = self.heartbeat.time_since_pong(now).as_millis(),
                    timeout_ms = self.heartbeat.pong_timeout().as_millis(),
                    "No pong within timeout, dropping connection"
                );
                Some(Loss::PongTimeout)
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Option<Loss> {
        match event {
            TransportEvent::Established => self.on_established(),
            TransportEvent::Data(text) => self.on_data(&text),
            TransportEvent::Pong => {
                self.heartbeat.record_pong(Instant::now());
                tracing::trace!("Received pong");
            }
            TransportEvent::Writable => self.flush().await,
            TransportEvent::Closed => return Some(Loss::Closed),
            TransportEvent::Error(message) => return Some(Loss::Error(message)),
        }
        None
    }

    fn on_established(&mut self) {
        self.policy.reset();
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
        self.heartbeat.reset(Instant::now());
        self.shared.set_state(ConnectionState::Established);

        let restored = self.shared.subscriptions.snapshot();
        tracing::info!(
            url = %self.endpoint.url(),
            restoring = restored.len(),
            "Connected to OKX feed"
        );

        for subscription in &restored {
            match OperationRequest::subscribe(subscription).to_frame() {
                Ok(frame) => self.shared.enqueue(frame),
                Err(e) => tracing::warn!(
                    inst_id = %subscription.inst_id,
                    error = %e,
                    "Failed to encode subscription"
                ),
            }
        }
    }

    fn on_data(&self, text: &str) {
        let started = Instant::now();
        let parsed = parse_tickers(text);
        metrics::record_parse_duration(started.elapsed());

        if let Some(records) = parsed {
            metrics::record_frame_received(FrameOutcome::Ticker);
            let count = records.len() as u64;
            if self.shared.dispatcher.dispatch(records) > 0 {
                metrics::record_tickers_dispatched(count);
            } else {
                metrics::record_tickers_discarded(count);
            }
            return;
        }

        match decode_control(text) {
            Some(event) => {
                metrics::record_frame_received(FrameOutcome::Control);
                log_control(&event);
            }
            None => {
                metrics::record_frame_received(FrameOutcome::Discarded);
                tracing::trace!(len = text.len(), "Discarded frame");
            }
        }
    }

    async fn flush(&mut self) {
        if !self.shared.is_connected() {
            return;
        }

        match self.shared.queue.drain(&mut *self.transport).await {
            Ok(written) => metrics::record_frames_sent(written as u64),
            Err(e) => tracing::warn!(
                error = %e,
                pending = self.shared.queue.len(),
                "Send queue drain stopped"
            ),
        }
        metrics::set_send_queue_depth(self.shared.queue.len());
    }

    /// Release the lost transport and settle to `Disconnected`.
    async fn tear_down(&mut self, loss: Loss) {
        let (kind, close) = match &loss {
            Loss::Closed => {
                tracing::info!("Feed connection closed by peer");
                (ConnectionErrorKind::Closed, CloseKind::Normal)
            }
            Loss::Error(message) => {
                tracing::warn!(error = %message, "Feed connection error");
                (ConnectionErrorKind::Transport, CloseKind::Normal)
            }
            Loss::PongTimeout => (ConnectionErrorKind::PongTimeout, CloseKind::Abnormal),
        };

        metrics::record_connection_error(kind);
        self.shared.settle_disconnected(false);
        self.transport.close(close).await;
    }

    /// Wait out the backoff and reopen. Returns `false` when the session
    /// should end instead.
    async fn reconnect(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            if !self.shared.auto_reconnect.load(Ordering::Relaxed) {
                tracing::info!("Auto-reconnect disabled, staying disconnected");
                return false;
            }

            let Some(delay) = self.policy.next_delay() else {
                tracing::error!(
                    attempts = self.policy.attempt_count(),
                    "Max reconnection attempts reached"
                );
                return false;
            };

            let attempt = self.policy.attempt_count();
            self.shared
                .reconnect_attempts
                .store(attempt, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis(),
                "Reconnecting to OKX feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Reconnect cancelled during backoff");
                    return false;
                }
                () = tokio::time::sleep(delay) => {}
            }

            self.transport = self.factory.create();
            match self.transport.open(&self.shared.target(&self.endpoint)) {
                Ok(()) => {
                    self.shared.set_state(ConnectionState::Connecting);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed to start");
                    metrics::record_connection_error(ConnectionErrorKind::OpenFailed);
                }
            }
        }
    }
}

fn log_control(event: &ControlEvent) {
    match event {
        ControlEvent::Subscribe { arg, .. } => {
            tracing::info!(channel = %arg.channel, inst_id = %arg.inst_id, "Subscription acknowledged");
        }
        ControlEvent::Unsubscribe { arg, .. } => {
            tracing::info!(channel = %arg.channel, inst_id = %arg.inst_id, "Unsubscription acknowledged");
        }
        ControlEvent::Error { code, msg } => {
            tracing::warn!(code = %code, msg = %msg, "Server rejected request");
        }
        ControlEvent::Notice { code, msg } => {
            tracing::warn!(code = %code, msg = %msg, "Server notice");
        }
    }
}
