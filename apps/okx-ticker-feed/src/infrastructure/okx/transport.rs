//! WebSocket Transport
//!
//! `Transport` adapter over `tokio-tungstenite`. `open` only stores the
//! dial future; the TCP connect, optional proxy tunnel, TLS and WebSocket
//! handshake all make progress inside `service`, so the service loop never
//! blocks on connection setup.
//!
//! `service` is cancel-safe: an interrupted call loses no frames and does
//! not restart a pending dial.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::proxy::establish_tunnel;
use crate::application::ports::{CloseKind, FrameKind, Transport, TransportError, TransportEvent};
use crate::domain::connection::ConnectTarget;

/// Upper bound on dial + handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type DialFuture = Pin<Box<dyn Future<Output = Result<WsStream, TransportError>> + Send>>;

enum Link {
    Idle,
    Connecting(DialFuture),
    Open(Box<WsStream>),
}

/// WebSocket transport for the OKX feed.
pub struct WsTransport {
    link: Link,
    writable_requested: bool,
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    /// Create an idle transport.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            link: Link::Idle,
            writable_requested: false,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the dial + handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Factory for `FeedClient`, producing default transports.
    #[must_use]
    pub fn boxed() -> Box<dyn Transport> {
        Box::new(Self::new())
    }

    fn reset(&mut self) {
        self.link = Link::Idle;
        self.writable_requested = false;
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = match self.link {
            Link::Idle => "idle",
            Link::Connecting(_) => "connecting",
            Link::Open(_) => "open",
        };
        f.debug_struct("WsTransport")
            .field("link", &link)
            .field("writable_requested", &self.writable_requested)
            .finish()
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn open(&mut self, target: &ConnectTarget) -> Result<(), TransportError> {
        let url = target.endpoint.url();
        url::Url::parse(&url).map_err(|e| TransportError::InvalidEndpoint(format!("{url}: {e}")))?;

        let target = target.clone();
        let timeout = self.connect_timeout;
        let connecting = async move {
            tokio::time::timeout(timeout, dial(target))
                .await
                .map_err(|_| TransportError::Connect(format!("timed out after {timeout:?}")))?
        };

        self.link = Link::Connecting(Box::pin(connecting));
        self.writable_requested = false;
        Ok(())
    }

    async fn service(&mut self, timeout: Duration) -> Option<TransportEvent> {
        match &mut self.link {
            Link::Idle => {
                tokio::time::sleep(timeout).await;
                None
            }
            Link::Connecting(dial) => match tokio::time::timeout(timeout, dial.as_mut()).await {
                Err(_) => None,
                Ok(Ok(stream)) => {
                    self.link = Link::Open(Box::new(stream));
                    Some(TransportEvent::Established)
                }
                Ok(Err(e)) => {
                    self.reset();
                    Some(TransportEvent::Error(e.to_string()))
                }
            },
            Link::Open(stream) => {
                if self.writable_requested {
                    self.writable_requested = false;
                    return Some(TransportEvent::Writable);
                }

                let Ok(next) = tokio::time::timeout(timeout, stream.next()).await else {
                    return None;
                };

                match next {
                    Some(Ok(Message::Text(text))) => Some(TransportEvent::Data(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes.to_vec())
                        .ok()
                        .map(TransportEvent::Data),
                    Some(Ok(Message::Pong(_))) => Some(TransportEvent::Pong),
                    // Pings are answered by tungstenite on the next read or write.
                    Some(Ok(Message::Ping(_) | Message::Frame(_))) => None,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(frame = ?frame, "Peer sent close frame");
                        self.reset();
                        Some(TransportEvent::Closed)
                    }
                    Some(Err(e)) => {
                        self.reset();
                        Some(TransportEvent::Error(e.to_string()))
                    }
                    None => {
                        self.reset();
                        Some(TransportEvent::Closed)
                    }
                }
            }
        }
    }

    fn request_writable(&mut self) {
        self.writable_requested = true;
    }

    async fn write(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError> {
        let Link::Open(stream) = &mut self.link else {
            return Err(TransportError::NotOpen);
        };

        let message = match kind {
            FrameKind::Text => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
                Message::Text(text.to_owned().into())
            }
            FrameKind::Ping => Message::Ping(payload.to_vec().into()),
        };

        stream
            .send(message)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self, kind: CloseKind) {
        let link = std::mem::replace(&mut self.link, Link::Idle);
        self.writable_requested = false;

        if let (Link::Open(mut stream), CloseKind::Normal) = (link, kind) {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = (*stream).close(Some(frame)).await {
                tracing::debug!(error = %e, "Close handshake failed");
            }
        }
    }
}

/// TCP connect (to the proxy if configured), tunnel, then TLS and the
/// WebSocket upgrade.
async fn dial(target: ConnectTarget) -> Result<WsStream, TransportError> {
    let url = target.endpoint.url();
    let address = target
        .proxy
        .as_ref()
        .map_or_else(|| target.endpoint.authority(), |proxy| proxy.authority());

    tracing::debug!(url = %url, address = %address, "Dialing feed");

    let mut tcp = TcpStream::connect(&address)
        .await
        .map_err(|e| TransportError::Connect(format!("{address}: {e}")))?;
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    if let Some(proxy) = &target.proxy {
        establish_tunnel(&mut tcp, proxy, &target.endpoint)
            .await
            .map_err(|e| TransportError::Proxy(e.to_string()))?;
    }

    let (stream, response) =
        tokio_tungstenite::client_async_tls_with_config(url.as_str(), tcp, None, None)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

    tracing::debug!(status = %response.status(), "WebSocket handshake complete");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::domain::connection::{Endpoint, ProxySettings};

    const TICK: Duration = Duration::from_millis(50);

    /// Local plain-text WebSocket server that echoes text frames.
    async fn echo_server() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });

        (port, handle)
    }

    async fn next_event(transport: &mut WsTransport) -> TransportEvent {
        for _ in 0..100 {
            if let Some(event) = transport.service(TICK).await {
                return event;
            }
        }
        panic!("no transport event within 5s");
    }

    fn local(port: u16) -> ConnectTarget {
        ConnectTarget::direct(Endpoint::new("127.0.0.1", port, "/ws/v5/public", false))
    }

    #[tokio::test]
    async fn write_before_open_fails() {
        let mut transport = WsTransport::new();
        let err = transport.write(b"{}", FrameKind::Text).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn idle_service_yields_nothing() {
        let mut transport = WsTransport::new();
        assert!(transport.service(Duration::from_millis(1)).await.is_none());
    }

    #[tokio::test]
    async fn open_rejects_invalid_endpoint() {
        let mut transport = WsTransport::new();
        let target = ConnectTarget::direct(Endpoint::new("", 8443, "/", true));
        assert!(matches!(
            transport.open(&target),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn establishes_and_echoes_text() {
        let (port, _server) = echo_server().await;
        let mut transport = WsTransport::new();
        transport.open(&local(port)).unwrap();

        assert_eq!(next_event(&mut transport).await, TransportEvent::Established);

        transport.request_writable();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Writable);

        transport.write(br#"{"op":"subscribe"}"#, FrameKind::Text).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Data(r#"{"op":"subscribe"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (port, _server) = echo_server().await;
        let mut transport = WsTransport::new();
        transport.open(&local(port)).unwrap();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Established);

        transport.write(&[], FrameKind::Ping).await.unwrap();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Pong);
    }

    #[tokio::test]
    async fn server_shutdown_reports_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.close(None).await;
        });

        let mut transport = WsTransport::new();
        transport.open(&local(port)).unwrap();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Established);
        assert_eq!(next_event(&mut transport).await, TransportEvent::Closed);

        let err = transport.write(b"{}", FrameKind::Text).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn refused_connection_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = WsTransport::new();
        transport.open(&local(port)).unwrap();
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::Error(_)
        ));
    }

    #[tokio::test]
    async fn connects_through_http_proxy() {
        let (ws_port, _server) = echo_server().await;

        // Minimal CONNECT proxy: accept the tunnel request, then splice.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_port = proxy_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                client.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let request = String::from_utf8(head).unwrap();
            assert!(request.starts_with(&format!("CONNECT 127.0.0.1:{ws_port} HTTP/1.1")));

            let mut upstream = TcpStream::connect(("127.0.0.1", ws_port)).await.unwrap();
            client
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        });

        let target = ConnectTarget {
            proxy: Some(ProxySettings::http("127.0.0.1", proxy_port)),
            ..local(ws_port)
        };

        let mut transport = WsTransport::new();
        transport.open(&target).unwrap();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Established);

        transport.write(b"hello", FrameKind::Text).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Data("hello".to_string())
        );
    }

    #[tokio::test]
    async fn abnormal_close_drops_link() {
        let (port, _server) = echo_server().await;
        let mut transport = WsTransport::new();
        transport.open(&local(port)).unwrap();
        assert_eq!(next_event(&mut transport).await, TransportEvent::Established);

        transport.close(CloseKind::Abnormal).await;

        assert!(matches!(
            transport.write(b"x", FrameKind::Text).await,
            Err(TransportError::NotOpen)
        ));
    }
}
