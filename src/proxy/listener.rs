use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::http::{Exchange, HttpConn, Limits};
use crate::proxy::handler;
use crate::proxy::upstream::Upstream;

/// How accepted sockets are turned into byte streams.
#[derive(Clone)]
pub enum Acceptor {
    Plain,
    Tls(TlsAcceptor),
}

impl Acceptor {
    pub fn tls(config: Arc<ServerConfig>) -> Self {
        Acceptor::Tls(TlsAcceptor::from(config))
    }
}

/// Accepts client connections and bridges each one to the upstream.
pub struct Server {
    acceptor: Acceptor,
    upstream: Arc<Upstream>,
    limits: Limits,
    connections: TaskTracker,
    force_close: CancellationToken,
}

impl Server {
    pub fn new(acceptor: Acceptor, upstream: Upstream, limits: Limits) -> Self {
        Self {
            acceptor,
            upstream: Arc::new(upstream),
            limits,
            connections: TaskTracker::new(),
            force_close: CancellationToken::new(),
        }
    }

    /// Run the accept loop until `shutdown` is cancelled. The listener is
    /// closed on return; connections already accepted keep running.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            upstream = %self.upstream.addr(),
            tls = matches!(self.acceptor, Acceptor::Tls(_)),
            "proxy listening"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (tcp_stream, peer_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "failed to accept TCP connection");
                            continue;
                        }
                    };

                    debug!(peer = %peer_addr, "accepted TCP connection");
                    if let Err(e) = tcp_stream.set_nodelay(true) {
                        debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
                    }

                    self.connections.spawn(accept_connection(
                        tcp_stream,
                        peer_addr,
                        self.acceptor.clone(),
                        self.upstream.clone(),
                        self.limits,
                        self.force_close.clone(),
                    ));
                }
                _ = shutdown.cancelled() => {
                    info!("proxy listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for in-flight connections to finish, force-closing whatever is
    /// still relaying once `grace` has elapsed.
    pub async fn drain(&self, grace: Duration) {
        self.connections.close();
        info!(in_flight = self.connections.len(), "draining connections");

        if tokio::time::timeout(grace, self.connections.wait()).await.is_err() {
            warn!(
                remaining = self.connections.len(),
                grace_secs = grace.as_secs(),
                "grace period elapsed, force-closing relays"
            );
            self.force_close.cancel();
            self.connections.wait().await;
        }
    }
}

async fn accept_connection(
    tcp_stream: TcpStream,
    peer: SocketAddr,
    acceptor: Acceptor,
    upstream: Arc<Upstream>,
    limits: Limits,
    force_close: CancellationToken,
) {
    match acceptor {
        Acceptor::Plain => {
            serve_connection(tcp_stream, peer, &upstream, limits, &force_close).await;
        }
        Acceptor::Tls(acceptor) => {
            let handshake = tokio::select! {
                result = acceptor.accept(tcp_stream) => result,
                _ = force_close.cancelled() => return,
            };
            match handshake {
                Ok(tls_stream) => {
                    serve_connection(tls_stream, peer, &upstream, limits, &force_close).await;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                }
            }
        }
    }
}

async fn serve_connection<S>(
    io: S,
    peer: SocketAddr,
    upstream: &Upstream,
    limits: Limits,
    force_close: &CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = HttpConn::new(io, peer, limits);

    let read = tokio::select! {
        read = conn.read_request() => read,
        _ = force_close.cancelled() => return,
    };

    let request = match read {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            debug!(peer = %peer, error = %e, "rejecting malformed request");
            if let Err(e) = conn.respond(e.status()).await {
                debug!(peer = %peer, error = %e, "failed to send error response");
            }
            return;
        }
    };

    if let Err(e) = handler::handle(conn, request, upstream, force_close).await {
        debug!(peer = %peer, error = %e, "connection ended");
    }
}
