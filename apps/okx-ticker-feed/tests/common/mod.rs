//! Scripted in-memory transport for driving `FeedClient` end to end.
//!
//! Every `create()` on a `FakeNetwork` factory yields a new `FakeTransport`
//! and a matching `FakeConn` handle the test uses to inject events and
//! inspect what was written.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use okx_ticker_feed::{
    CloseKind, ConnectTarget, FrameKind, Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Ticker push frame with two valid records and one without `instId`.
pub const TICKER_FRAME: &str = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"43250.10","lastSz":"0.0100","askPx":"43250.2","askSz":"1.5","bidPx":"43250.1","bidSz":"2","open24h":"42000","high24h":"44000","low24h":"41500","volCcy24h":"123456789.5","vol24h":"2890.1","sodUtc0":"42800","sodUtc8":"42900","ts":"1597026383085"},{"instType":"SPOT","instId":"","last":"1"},{"instType":"SPOT","instId":"ETH-USDT","last":"2250.45","ts":"1597026383086"}]}"#;

/// Subscription acknowledgment.
pub const SUBSCRIBE_ACK: &str =
    r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#;

// =============================================================================
// Network
// =============================================================================

#[derive(Default)]
struct NetworkInner {
    conns: Mutex<Vec<Arc<FakeConn>>>,
    refuse: AtomicBool,
    manual_establish: AtomicBool,
    silent_peer: AtomicBool,
}

/// Factory of fake transports plus control over how they behave.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<NetworkInner>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport factory to hand to `FeedClient`.
    pub fn factory(&self) -> impl Fn() -> Box<dyn Transport> + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move || -> Box<dyn Transport> {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = Arc::new(FakeConn {
                events: tx,
                writes: Mutex::new(Vec::new()),
                opened: Mutex::new(None),
                closes: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
            });
            inner.conns.lock().push(Arc::clone(&conn));
            Box::new(FakeTransport {
                conn,
                network: Arc::clone(&inner),
                rx,
                open: false,
                writable_requested: false,
            })
        }
    }

    /// Make subsequent opens fail with a transport error event.
    pub fn set_refuse(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Require the test to push `Established` itself.
    pub fn set_manual_establish(&self, manual: bool) {
        self.inner.manual_establish.store(manual, Ordering::SeqCst);
    }

    /// Stop answering pings with pongs.
    pub fn set_silent_peer(&self, silent: bool) {
        self.inner.silent_peer.store(silent, Ordering::SeqCst);
    }

    /// Number of transports created so far.
    pub fn connections(&self) -> usize {
        self.inner.conns.lock().len()
    }

    /// Handle for the `index`-th transport.
    pub fn conn(&self, index: usize) -> Arc<FakeConn> {
        Arc::clone(&self.inner.conns.lock()[index])
    }

    /// Times at which each transport was opened.
    pub fn open_times(&self) -> Vec<Instant> {
        self.inner
            .conns
            .lock()
            .iter()
            .filter_map(|c| c.opened.lock().as_ref().map(|(_, at)| *at))
            .collect()
    }
}

// =============================================================================
// Connection handle
// =============================================================================

/// Test-side view of one transport.
pub struct FakeConn {
    events: mpsc::UnboundedSender<TransportEvent>,
    writes: Mutex<Vec<(FrameKind, String)>>,
    opened: Mutex<Option<(ConnectTarget, Instant)>>,
    closes: Mutex<Vec<CloseKind>>,
    fail_writes: AtomicBool,
}

impl FakeConn {
    /// Deliver an event on the next `service` call.
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver an inbound text frame.
    pub fn deliver(&self, frame: &str) {
        self.push(TransportEvent::Data(frame.to_string()));
    }

    /// Text frames written, in order.
    pub fn texts(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == FrameKind::Text)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Pings written.
    pub fn pings(&self) -> usize {
        self.writes
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == FrameKind::Ping)
            .count()
    }

    /// Close calls received, in order.
    pub fn closes(&self) -> Vec<CloseKind> {
        self.closes.lock().clone()
    }

    /// Target passed to `open`.
    pub fn target(&self) -> Option<ConnectTarget> {
        self.opened.lock().as_ref().map(|(target, _)| target.clone())
    }

    /// Make writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

// =============================================================================
// Transport
// =============================================================================

struct FakeTransport {
    conn: Arc<FakeConn>,
    network: Arc<NetworkInner>,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    open: bool,
    writable_requested: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn open(&mut self, target: &ConnectTarget) -> Result<(), TransportError> {
        *self.conn.opened.lock() = Some((target.clone(), Instant::now()));

        if self.network.refuse.load(Ordering::SeqCst) {
            self.conn
                .push(TransportEvent::Error("connection refused".to_string()));
        } else if !self.network.manual_establish.load(Ordering::SeqCst) {
            self.conn.push(TransportEvent::Established);
        }
        Ok(())
    }

    async fn service(&mut self, timeout: Duration) -> Option<TransportEvent> {
        if self.open && self.writable_requested {
            self.writable_requested = false;
            return Some(TransportEvent::Writable);
        }

        let event = tokio::time::timeout(timeout, self.rx.recv()).await.ok()??;
        match event {
            TransportEvent::Established => self.open = true,
            TransportEvent::Closed | TransportEvent::Error(_) => self.open = false,
            _ => {}
        }
        Some(event)
    }

    fn request_writable(&mut self) {
        self.writable_requested = true;
    }

    async fn write(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.conn.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("would block".to_string()));
        }

        self.conn
            .writes
            .lock()
            .push((kind, String::from_utf8_lossy(payload).into_owned()));

        if kind == FrameKind::Ping && !self.network.silent_peer.load(Ordering::SeqCst) {
            self.conn.push(TransportEvent::Pong);
        }
        Ok(())
    }

    async fn close(&mut self, kind: CloseKind) {
        self.conn.closes.lock().push(kind);
        self.open = false;
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` until it holds, failing after `limit` of (virtual) time.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
