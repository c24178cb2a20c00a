//! TLS-terminating bridge that hands each client connection, request and
//! all, to a fixed upstream and then relays raw bytes both ways.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod tls;

pub use config::{Config, ListenMode, LogFormat};
pub use error::{Error, Result};
pub use http::Limits;
pub use proxy::listener::{Acceptor, Server};
pub use proxy::relay::{relay, RelayStats};
pub use proxy::upstream::Upstream;
