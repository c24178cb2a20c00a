use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wss_bridge::config::{Config, ListenMode, LogFormat};
use wss_bridge::http::Limits;
use wss_bridge::proxy::listener::{Acceptor, Server};
use wss_bridge::proxy::upstream::Upstream;
use wss_bridge::{tls, Result};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_format);
    info!(
        listen = %config.listen_addr,
        upstream = %config.upstream_addr,
        mode = ?config.mode,
        "wss-bridge starting"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "wss-bridge exited with error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let upstream = Upstream::new(config.upstream_addr.clone());
    upstream.probe().await?;

    let acceptor = match config.mode {
        ListenMode::Plain => Acceptor::Plain,
        ListenMode::Tls => Acceptor::tls(tls::load_server_config(
            &config.tls_cert_path,
            &config.tls_key_path,
        )?),
    };

    let limits = Limits {
        max_header_bytes: config.max_header_bytes,
        max_body_bytes: config.max_body_bytes,
    };
    let server = Server::new(acceptor, upstream, limits);
    let listener = TcpListener::bind(config.listen_addr).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping...");
        signal_token.cancel();
    });

    server.serve(listener, shutdown).await?;
    server.drain(config.shutdown_grace).await;
    info!("wss-bridge stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
    }
}

fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
