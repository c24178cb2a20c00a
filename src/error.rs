use std::io;

use crate::http::Status;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate parse error: {0}")]
    CertParse(String),

    #[error("dial upstream {addr} failed: {source}")]
    UpstreamDial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write request to upstream failed: {0}")]
    Replay(#[source] io::Error),

    #[error("hijack unsupported: {0}")]
    HijackUnsupported(String),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("request head exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The response status a client gets when its request fails with this error.
    pub fn status(&self) -> Status {
        match self {
            Error::UpstreamDial { .. } | Error::Replay(_) => Status::BadGateway,
            Error::BadRequest(_) => Status::BadRequest,
            Error::HeaderTooLarge(_) => Status::HeaderFieldsTooLarge,
            Error::BodyTooLarge(_) => Status::PayloadTooLarge,
            Error::UnsupportedEncoding(_) => Status::NotImplemented,
            _ => Status::InternalServerError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
