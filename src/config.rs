use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub upstream_addr: String,
    pub mode: ListenMode,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    pub shutdown_grace: Duration,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListenMode {
    Plain,
    Tls,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let listen_addr: SocketAddr = var("LISTEN_ADDR", "0.0.0.0:8084")
            .parse()
            .map_err(|e| Error::Config(format!("invalid LISTEN_ADDR: {e}")))?;

        let upstream_addr = var("UPSTREAM_ADDR", "127.0.0.1:8083");
        validate_host_port(&upstream_addr)?;

        let mode = match var("LISTEN_MODE", "plain").to_lowercase().as_str() {
            "plain" => ListenMode::Plain,
            "tls" => ListenMode::Tls,
            other => {
                return Err(Error::Config(format!(
                    "invalid LISTEN_MODE '{other}': must be 'plain' or 'tls'"
                )))
            }
        };

        let data_dir = default_data_dir();
        let tls_cert_path = lookup("TLS_CERT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("server.pem"));
        let tls_key_path = lookup("TLS_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("server.key"));

        let grace_secs: u64 = var("SHUTDOWN_GRACE_SECS", "5")
            .parse()
            .map_err(|e| Error::Config(format!("invalid SHUTDOWN_GRACE_SECS: {e}")))?;

        let max_header_bytes = positive_usize(&var("MAX_HEADER_BYTES", "65536"), "MAX_HEADER_BYTES")?;
        let max_body_bytes: usize = var("MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|e| Error::Config(format!("invalid MAX_BODY_BYTES: {e}")))?;

        let log_format = match var("LOG_FORMAT", "json").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => {
                return Err(Error::Config(format!(
                    "invalid LOG_FORMAT '{other}': must be 'json' or 'pretty'"
                )))
            }
        };

        Ok(Config {
            listen_addr,
            upstream_addr,
            mode,
            tls_cert_path,
            tls_key_path,
            shutdown_grace: Duration::from_secs(grace_secs),
            max_header_bytes,
            max_body_bytes,
            log_format,
        })
    }
}

/// `data/` next to the running executable, falling back to the working directory.
fn default_data_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("data")
}

fn validate_host_port(addr: &str) -> Result<()> {
    let invalid = || Error::Config(format!("invalid UPSTREAM_ADDR '{addr}': expected host:port"));

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

fn positive_usize(raw: &str, key: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(0) => Err(Error::Config(format!("{key} must be greater than zero"))),
        Ok(n) => Ok(n),
        Err(e) => Err(Error::Config(format!("invalid {key}: {e}"))),
    }
}
