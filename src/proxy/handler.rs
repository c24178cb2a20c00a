use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::http::{Exchange, Request};
use crate::proxy::relay::{self, RelayStats};
use crate::proxy::upstream::Upstream;

/// Bridge one request to the upstream: dial, replay the request, take over
/// the client transport and relay until either side is done.
///
/// Failures before the relay starts answer the client with an error status
/// and are returned; once relaying, nothing is reported back.
pub async fn handle<E>(
    mut exchange: E,
    request: Request,
    upstream: &Upstream,
    force_close: &CancellationToken,
) -> Result<RelayStats>
where
    E: Exchange,
{
    let peer = exchange.peer_addr();

    if !exchange.can_hijack() {
        let err = Error::HijackUnsupported(format!("connection from {peer} cannot be taken over"));
        return Err(reject(&mut exchange, err).await);
    }

    let mut conn = match upstream.dial().await {
        Ok(conn) => conn,
        Err(e) => return Err(reject(&mut exchange, e).await),
    };

    if let Err(e) = request.write_to(&mut conn).await {
        return Err(reject(&mut exchange, e).await);
    }

    let client = match exchange.hijack() {
        Ok(hijacked) => hijacked,
        Err(e) => return Err(reject(&mut exchange, e).await),
    };

    if !client.buffered.is_empty() {
        conn.write_all(&client.buffered).await?;
        conn.flush().await?;
    }

    info!(
        upstream_peer = %conn.peer_addr()?,
        upstream_local = %conn.local_addr()?,
        client = %peer,
        method = %request.method,
        target = %request.target,
        "serving"
    );

    let stats = relay::relay(client.io, conn, force_close).await;
    debug!(
        client = %peer,
        client_to_upstream = stats.client_to_upstream,
        upstream_to_client = stats.upstream_to_client,
        "connection closed"
    );
    Ok(stats)
}

/// Answer the client with the status matching `err` and hand the error back.
async fn reject<E: Exchange>(exchange: &mut E, err: Error) -> Error {
    let status = err.status();
    warn!(client = %exchange.peer_addr(), status = status.code(), error = %err, "request not bridged");
    if let Err(e) = exchange.respond(status).await {
        debug!(client = %exchange.peer_addr(), error = %e, "failed to send error response");
    }
    err
}
