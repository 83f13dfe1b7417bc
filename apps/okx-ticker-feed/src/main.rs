//! OKX Ticker Feed Binary
//!
//! Connects to the OKX public feed, subscribes to the configured
//! instruments and logs every ticker received.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin okx-ticker-feed
//! ```
//!
//! # Environment Variables
//!
//! - `OKX_WS_HOST` / `OKX_WS_PORT` / `OKX_WS_PATH` / `OKX_WS_TLS`: Feed endpoint
//!   (default: `wss://ws.okx.com:8443/ws/v5/public`)
//! - `OKX_INSTRUMENTS`: Comma-separated instrument IDs (default: BTC-USDT,ETH-USDT)
//! - `FEED_PING_INTERVAL_SECS`: Liveness ping interval (default: 30)
//! - `FEED_AUTO_RECONNECT`: Reconnect after connection loss (default: true)
//! - `FEED_RECONNECT_DELAY_INITIAL_MS`: First backoff delay (default: 1000)
//! - `FEED_RECONNECT_DELAY_MAX_SECS`: Backoff cap (default: 30)
//! - `FEED_MAX_RECONNECT_ATTEMPTS`: Attempts before giving up, 0 = unlimited (default: 10)
//! - `FEED_RECONNECT_JITTER_PCT`: Backoff jitter in percent, 0-100 (default: 0)
//! - `FEED_PROXY_URL`: `http://[user:pass@]host:port` or `socks5://...`
//! - `FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: okx-ticker-feed)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use okx_ticker_feed::infrastructure::health::{HealthServer, HealthServerState};
use okx_ticker_feed::infrastructure::telemetry;
use okx_ticker_feed::{FeedClient, FeedConfig, TickerRecord, WsTransport, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How often to check whether the first connection is up.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting OKX ticker feed");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = Arc::new(FeedClient::with_settings(
        WsTransport::boxed,
        &config.connection,
    ));
    if let Some(proxy) = config.proxy.clone() {
        client.set_proxy(proxy);
    }
    client.set_ticker_callback(log_ticker);

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&client),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    client
        .connect(config.endpoint.clone())
        .context("failed to start feed connection")?;

    let exhausted = tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => false,
        () = run_feed(&client, &config.instruments) => true,
    };

    shutdown_token.cancel();
    client.disconnect().await;

    if exhausted {
        return Err(anyhow!("feed stopped after exhausting reconnection attempts"));
    }

    tracing::info!("OKX ticker feed stopped");
    Ok(())
}

/// Subscribe once the first connection is up, then run until the client
/// gives up reconnecting.
async fn run_feed(client: &FeedClient, instruments: &[String]) {
    tokio::select! {
        () = client.wait_stopped() => return,
        () = wait_connected(client) => {}
    }

    for inst_id in instruments {
        if let Err(e) = client.subscribe(inst_id) {
            tracing::warn!(inst_id = %inst_id, error = %e, "Subscribe failed");
        }
    }

    client.wait_stopped().await;
}

async fn wait_connected(client: &FeedClient) {
    while !client.is_connected() {
        tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
    }
}

fn log_ticker(ticker: &TickerRecord) {
    tracing::info!(
        inst_id = %ticker.inst_id,
        last = %ticker.last,
        bid = %ticker.bid_px,
        ask = %ticker.ask_px,
        vol_24h = %ticker.vol_24h,
        ts = %ticker.ts,
        "Ticker"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        url = %config.endpoint.url(),
        instruments = ?config.instruments,
        ping_interval_secs = config.connection.ping_interval.as_secs(),
        auto_reconnect = config.connection.auto_reconnect,
        max_reconnect_attempts = config.connection.max_reconnect_attempts,
        reconnect_jitter_pct = config.connection.reconnect_jitter_pct,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    if let Some(proxy) = &config.proxy {
        tracing::info!(kind = proxy.kind.as_str(), proxy = %proxy.authority(), "Using proxy");
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
