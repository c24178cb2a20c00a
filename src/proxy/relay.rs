use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on flushing a close (e.g. TLS close_notify) to a stalled peer.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client->upstream"),
            Direction::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// Why one direction of a relay stopped. None of these are faults.
#[derive(Debug)]
pub enum RelayEnd {
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// The other direction ended first, or the process is force-closing relays.
    Closed,
}

/// Bytes moved in each direction over the life of one connection pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Relay bytes between `client` and `upstream` until either direction ends.
///
/// Takes ownership of both endpoints and runs one task per direction. The
/// first direction to finish, for whatever reason, tears the pair down:
/// both write sides are shut down once and both transports are closed once
/// the two tasks have dropped their halves. Cancelling `force_close` ends
/// the relay the same way.
pub async fn relay<C, U>(client: C, upstream: U, force_close: &CancellationToken) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let pair = force_close.child_token();

    let (client_rd, client_wr) = split(client);
    let (upstream_rd, upstream_wr) = split(upstream);

    let uplink = tokio::spawn(pump(
        client_rd,
        upstream_wr,
        pair.clone(),
        Direction::ClientToUpstream,
    ));
    let downlink = tokio::spawn(pump(
        upstream_rd,
        client_wr,
        pair,
        Direction::UpstreamToClient,
    ));

    let (up, down) = tokio::join!(uplink, downlink);

    RelayStats {
        client_to_upstream: up.unwrap_or_default(),
        upstream_to_client: down.unwrap_or_default(),
    }
}

async fn pump<R, W>(
    mut src: ReadHalf<R>,
    mut dst: WriteHalf<W>,
    pair: CancellationToken,
    direction: Direction,
) -> u64
where
    R: AsyncRead,
    W: AsyncWrite,
{
    // Cancels the pair even if this task unwinds.
    let _teardown = pair.clone().drop_guard();

    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut copied = 0u64;

    let end = loop {
        let n = tokio::select! {
            _ = pair.cancelled() => break RelayEnd::Closed,
            read = src.read(&mut buf) => match read {
                Ok(0) => break RelayEnd::Eof,
                Ok(n) => n,
                Err(e) => break RelayEnd::ReadFailed(e),
            },
        };

        let write = async {
            dst.write_all(&buf[..n]).await?;
            dst.flush().await
        };

        tokio::select! {
            _ = pair.cancelled() => break RelayEnd::Closed,
            written = write => {
                if let Err(e) = written {
                    break RelayEnd::WriteFailed(e);
                }
            }
        }

        copied += n as u64;
    };

    pair.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, dst.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%direction, error = %e, "shutdown of relay destination failed"),
        Err(_) => debug!(%direction, "shutdown of relay destination timed out"),
    }

    debug!(%direction, bytes = copied, end = ?end, "relay direction finished");
    copied
}
