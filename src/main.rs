use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use webhook_relay::server::{self, shutdown_signal};
use webhook_relay::{AppState, Args, Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // parse cli arguments, env vars fill anything not passed
    let args = Args::parse();
    let config = GatewayConfig::try_from(args).context("invalid configuration")?;
    info!(?config, "configuration loaded");

    let listen_addr = config.listen_addr;
    let window = config.window;
    let max_per_window = config.max_per_window;

    let gateway = Gateway::new(config).context("failed to build gateway")?;

    let shutdown = CancellationToken::new();
    let sweeper = gateway.spawn_sweeper(shutdown.clone());

    let state = AppState::new(gateway);
    let app = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    info!(
        max_per_window,
        window_secs = window.as_secs(),
        "rate limit configured"
    );

    server::serve(listener, app, shutdown_signal()).await?;

    shutdown.cancel();
    sweeper.await.context("sweeper task panicked")?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webhook_relay=debug,tower_http=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
