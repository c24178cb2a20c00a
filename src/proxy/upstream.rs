use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The single fixed backend every connection is relayed to.
#[derive(Debug, Clone)]
pub struct Upstream {
    addr: String,
}

impl Upstream {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open one plain TCP connection. A failure is final for the request
    /// that asked for it; nothing is retried.
    pub async fn dial(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| Error::UpstreamDial {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        debug!(upstream = %self.addr, "upstream dialed");
        Ok(stream)
    }

    /// Startup reachability check: dial once and hang up.
    pub async fn probe(&self) -> Result<()> {
        let stream = self.dial().await?;
        drop(stream);
        info!(upstream = %self.addr, "upstream ok");
        Ok(())
    }
}
