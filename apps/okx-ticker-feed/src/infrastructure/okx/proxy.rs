//! Proxy Tunnels
//!
//! Opens a byte tunnel to the feed endpoint through an HTTP `CONNECT` proxy
//! or a SOCKS5 proxy (RFC 1928, username/password per RFC 1929). The
//! tunnel is negotiated on an already-connected stream to the proxy; TLS
//! and the WebSocket handshake run on top of it afterwards.

use std::net::IpAddr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::connection::{Endpoint, ProxyKind, ProxySettings};

/// Upper bound on an HTTP proxy response header block.
const MAX_HTTP_RESPONSE: usize = 8 * 1024;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_AUTH_NONE: u8 = 0x00;
const SOCKS_AUTH_PASSWORD: u8 = 0x02;
const SOCKS_AUTH_UNACCEPTABLE: u8 = 0xFF;
const SOCKS_PASSWORD_VERSION: u8 = 0x01;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

/// Proxy negotiation errors.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Socket I/O failed during negotiation.
    #[error("proxy I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP proxy answered `CONNECT` with a non-2xx status.
    #[error("HTTP proxy refused CONNECT: {0}")]
    HttpStatus(String),

    /// Proxy response did not follow the protocol.
    #[error("malformed proxy response: {0}")]
    Malformed(String),

    /// SOCKS5 proxy accepted none of the offered auth methods.
    #[error("SOCKS5 proxy accepted no offered authentication method")]
    NoAcceptableAuth,

    /// SOCKS5 proxy rejected the credentials.
    #[error("SOCKS5 proxy rejected credentials")]
    AuthRejected,

    /// SOCKS5 `CONNECT` failed.
    #[error("SOCKS5 connect failed: {reason} ({code:#04x})")]
    SocksReply {
        /// Reply code from the proxy.
        code: u8,
        /// Meaning of `code`.
        reason: &'static str,
    },

    /// A host name or credential exceeds the 255-byte SOCKS5 field limit.
    #[error("SOCKS5 field too long: {0}")]
    FieldTooLong(&'static str),
}

const fn socks_reply_text(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Negotiate a tunnel to `target` over `stream`, which must already be
/// connected to `proxy`.
///
/// # Errors
///
/// Returns an error if the proxy refuses the tunnel or violates its protocol.
pub async fn establish_tunnel<S>(
    stream: &mut S,
    proxy: &ProxySettings,
    target: &Endpoint,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!(
        kind = proxy.kind.as_str(),
        proxy = %proxy.authority(),
        target = %target.authority(),
        "Negotiating proxy tunnel"
    );

    match proxy.kind {
        ProxyKind::Http => http_connect(stream, proxy, target).await,
        ProxyKind::Socks5 => socks5_connect(stream, proxy, target).await,
    }
}

// =============================================================================
// HTTP CONNECT
// =============================================================================

async fn http_connect<S>(
    stream: &mut S,
    proxy: &ProxySettings,
    target: &Endpoint,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = target.authority();
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((user, pass)) = proxy.credentials() {
        let token = BASE64.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_http_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default();

    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::Malformed(status_line.to_string()));
    }

    if status.len() == 3 && status.starts_with('2') {
        Ok(())
    } else {
        Err(ProxyError::HttpStatus(status_line.to_string()))
    }
}

/// Read up to and including the blank line that ends the header block.
///
/// Reads one byte at a time so nothing past the headers is consumed; the
/// bytes after belong to the TLS handshake.
async fn read_http_head<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HTTP_RESPONSE {
            return Err(ProxyError::Malformed("response headers too large".to_string()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(ProxyError::Malformed(
                "connection closed before end of headers".to_string(),
            ));
        }
        head.push(byte[0]);
    }

    String::from_utf8(head).map_err(|_| ProxyError::Malformed("non-UTF-8 headers".to_string()))
}

// =============================================================================
// SOCKS5
// =============================================================================

async fn socks5_connect<S>(
    stream: &mut S,
    proxy: &ProxySettings,
    target: &Endpoint,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let credentials = proxy.credentials();

    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS_VERSION, 2, SOCKS_AUTH_NONE, SOCKS_AUTH_PASSWORD]
    } else {
        &[SOCKS_VERSION, 1, SOCKS_AUTH_NONE]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(ProxyError::Malformed(format!("SOCKS version {}", choice[0])));
    }

    match (choice[1], credentials) {
        (SOCKS_AUTH_NONE, _) => {}
        (SOCKS_AUTH_PASSWORD, Some((user, pass))) => {
            socks5_password_auth(stream, user, pass).await?;
        }
        (SOCKS_AUTH_UNACCEPTABLE, _) => return Err(ProxyError::NoAcceptableAuth),
        (method, _) => {
            return Err(ProxyError::Malformed(format!(
                "unexpected SOCKS auth method {method:#04x}"
            )));
        }
    }

    stream.write_all(&socks5_connect_request(target)?).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(ProxyError::Malformed(format!("SOCKS version {}", reply[0])));
    }
    if reply[1] != 0x00 {
        return Err(ProxyError::SocksReply {
            code: reply[1],
            reason: socks_reply_text(reply[1]),
        });
    }

    // Bound address and port are not needed, but must be drained.
    let addr_len = match reply[3] {
        SOCKS_ATYP_IPV4 => 4,
        SOCKS_ATYP_IPV6 => 16,
        SOCKS_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => {
            return Err(ProxyError::Malformed(format!(
                "unknown SOCKS address type {other:#04x}"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

async fn socks5_password_auth<S>(stream: &mut S, user: &str, pass: &str) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user_len = u8::try_from(user.len()).map_err(|_| ProxyError::FieldTooLong("username"))?;
    let pass_len = u8::try_from(pass.len()).map_err(|_| ProxyError::FieldTooLong("password"))?;

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(SOCKS_PASSWORD_VERSION);
    request.push(user_len);
    request.extend_from_slice(user.as_bytes());
    request.push(pass_len);
    request.extend_from_slice(pass.as_bytes());
    stream.write_all(&request).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] == 0x00 {
        Ok(())
    } else {
        Err(ProxyError::AuthRejected)
    }
}

fn socks5_connect_request(target: &Endpoint) -> Result<Vec<u8>, ProxyError> {
    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];

    match target.host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(target.host.len())
                .map_err(|_| ProxyError::FieldTooLong("host"))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(target.host.as_bytes());
        }
    }

    request.extend_from_slice(&target.port.to_be_bytes());
    Ok(request)
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    fn okx() -> Endpoint {
        Endpoint::okx_public()
    }

    #[tokio::test]
    async fn http_connect_without_credentials() {
        let mut stream = Builder::new()
            .write(b"CONNECT ws.okx.com:8443 HTTP/1.1\r\nHost: ws.okx.com:8443\r\n\r\n")
            .read(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .build();

        let proxy = ProxySettings::http("127.0.0.1", 8080);
        establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap();
    }

    #[tokio::test]
    async fn http_connect_sends_basic_auth() {
        // "user:pass" in base64
        let mut stream = Builder::new()
            .write(
                b"CONNECT ws.okx.com:8443 HTTP/1.1\r\nHost: ws.okx.com:8443\r\n\
                  Proxy-Authorization: Basic dXNlcjpwYXNz\r\n\r\n",
            )
            .read(b"HTTP/1.0 200 OK\r\nVia: squid\r\n\r\n")
            .build();

        let proxy = ProxySettings::http("127.0.0.1", 8080).with_credentials("user", "pass");
        establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap();
    }

    #[tokio::test]
    async fn http_connect_rejected() {
        let mut stream = Builder::new()
            .write(b"CONNECT ws.okx.com:8443 HTTP/1.1\r\nHost: ws.okx.com:8443\r\n\r\n")
            .read(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .build();

        let proxy = ProxySettings::http("127.0.0.1", 8080);
        let err = establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::HttpStatus(line) if line.contains("407")));
    }

    #[tokio::test]
    async fn http_connect_closed_early() {
        let mut stream = Builder::new()
            .write(b"CONNECT ws.okx.com:8443 HTTP/1.1\r\nHost: ws.okx.com:8443\r\n\r\n")
            .read(b"HTTP/1.1 200")
            .build();

        let proxy = ProxySettings::http("127.0.0.1", 8080);
        let err = establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Malformed(_)));
    }

    #[tokio::test]
    async fn socks5_domain_connect_without_auth() {
        let mut connect = vec![0x05, 0x01, 0x00, 0x03, 10];
        connect.extend_from_slice(b"ws.okx.com");
        connect.extend_from_slice(&8443u16.to_be_bytes());

        let mut stream = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0x00])
            .write(&connect)
            .read(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x1F, 0x90])
            .build();

        let proxy = ProxySettings::socks5("127.0.0.1", 1080);
        establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap();
    }

    #[tokio::test]
    async fn socks5_password_auth_then_ipv4_connect() {
        let target = Endpoint::new("10.1.2.3", 9000, "/ws", false);
        let mut connect = vec![0x05, 0x01, 0x00, 0x01, 10, 1, 2, 3];
        connect.extend_from_slice(&9000u16.to_be_bytes());

        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0x02])
            .write(&[0x01, 4, b'u', b's', b'e', b'r', 2, b'p', b'w'])
            .read(&[0x01, 0x00])
            .write(&connect)
            .read(&[0x05, 0x00, 0x00, 0x03, 3, b'a', b'b', b'c', 0x00, 0x50])
            .build();

        let proxy = ProxySettings::socks5("127.0.0.1", 1080).with_credentials("user", "pw");
        establish_tunnel(&mut stream, &proxy, &target).await.unwrap();
    }

    #[tokio::test]
    async fn socks5_credentials_rejected() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0x02])
            .write(&[0x01, 1, b'u', 1, b'p'])
            .read(&[0x01, 0x01])
            .build();

        let proxy = ProxySettings::socks5("127.0.0.1", 1080).with_credentials("u", "p");
        let err = establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::AuthRejected));
    }

    #[tokio::test]
    async fn socks5_no_acceptable_method() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0xFF])
            .build();

        let proxy = ProxySettings::socks5("127.0.0.1", 1080);
        let err = establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoAcceptableAuth));
    }

    #[tokio::test]
    async fn socks5_connect_refused() {
        let mut connect = vec![0x05, 0x01, 0x00, 0x03, 10];
        connect.extend_from_slice(b"ws.okx.com");
        connect.extend_from_slice(&8443u16.to_be_bytes());

        let mut stream = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0x00])
            .write(&connect)
            .read(&[0x05, 0x05, 0x00, 0x01])
            .build();

        let proxy = ProxySettings::socks5("127.0.0.1", 1080);
        let err = establish_tunnel(&mut stream, &proxy, &okx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::SocksReply { code: 0x05, .. }));
        assert_eq!(err.to_string(), "SOCKS5 connect failed: connection refused (0x05)");
    }

    #[test]
    fn ipv6_target_uses_ipv6_address_type() {
        let request = socks5_connect_request(&Endpoint::new("::1", 443, "/", true)).unwrap();
        assert_eq!(request[3], SOCKS_ATYP_IPV6);
        assert_eq!(request.len(), 4 + 16 + 2);
    }

    #[test]
    fn overlong_host_is_rejected() {
        let host = "a".repeat(300);
        let err = socks5_connect_request(&Endpoint::new(host, 443, "/", true)).unwrap_err();
        assert!(matches!(err, ProxyError::FieldTooLong("host")));
    }
}
