use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::request::{parse_head, Request};
use crate::http::Status;

const READ_CHUNK: usize = 4096;

/// Size caps applied while framing the initial request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// A raw client transport taken away from the serving layer.
pub struct Hijacked<S> {
    pub io: S,
    /// Client bytes that were already read past the end of the request.
    pub buffered: Vec<u8>,
}

/// The serving layer's side of one request, as seen by the proxy handler.
pub trait Exchange: Send {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn peer_addr(&self) -> SocketAddr;

    /// Whether `hijack` can hand out the transport.
    fn can_hijack(&self) -> bool;

    /// Send a bodiless response. Only valid before a hijack.
    fn respond(&mut self, status: Status) -> impl Future<Output = io::Result<()>> + Send;

    /// Move the raw transport out. The serving layer loses all access to it.
    fn hijack(&mut self) -> Result<Hijacked<Self::Io>>;
}

/// An accepted connection speaking HTTP/1.x until it is hijacked.
pub struct HttpConn<S> {
    io: Option<S>,
    buf: Vec<u8>,
    peer: SocketAddr,
    limits: Limits,
}

impl<S> HttpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S, peer: SocketAddr, limits: Limits) -> Self {
        Self {
            io: Some(io),
            buf: Vec::new(),
            peer,
            limits,
        }
    }

    /// Read the initial request head and its body.
    ///
    /// Returns `Ok(None)` if the client goes away before the request is complete.
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        let head = loop {
            if let Some(head) = parse_head(&self.buf)? {
                break head;
            }
            if self.buf.len() >= self.limits.max_header_bytes {
                return Err(Error::HeaderTooLarge(self.limits.max_header_bytes));
            }
            if self.fill().await? == 0 {
                debug!(peer = %self.peer, buffered = self.buf.len(), "client closed before request head");
                return Ok(None);
            }
        };

        if head.len > self.limits.max_header_bytes {
            return Err(Error::HeaderTooLarge(self.limits.max_header_bytes));
        }
        if head.content_length > self.limits.max_body_bytes {
            return Err(Error::BodyTooLarge(self.limits.max_body_bytes));
        }

        let end = head.len + head.content_length;
        while self.buf.len() < end {
            if self.fill().await? == 0 {
                debug!(peer = %self.peer, "client closed before request body");
                return Ok(None);
            }
        }

        let mut request = head.request;
        request.body = self.buf[head.len..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(request))
    }

    async fn fill(&mut self) -> io::Result<usize> {
        let io = self.io.as_mut().ok_or_else(hijacked)?;
        let mut chunk = [0u8; READ_CHUNK];
        let n = io.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

impl<S> Exchange for HttpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = S;

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn can_hijack(&self) -> bool {
        self.io.is_some()
    }

    async fn respond(&mut self, status: Status) -> io::Result<()> {
        let io = self.io.as_mut().ok_or_else(hijacked)?;
        io.write_all(&status.response_bytes()).await?;
        io.flush().await
    }

    fn hijack(&mut self) -> Result<Hijacked<S>> {
        let io = self
            .io
            .take()
            .ok_or_else(|| Error::HijackUnsupported("connection already hijacked".into()))?;
        Ok(Hijacked {
            io,
            buffered: std::mem::take(&mut self.buf),
        })
    }
}

fn hijacked() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection has been hijacked")
}
