pub mod conn;
pub mod request;

pub use conn::{Exchange, Hijacked, HttpConn, Limits};
pub use request::{Header, Request};

/// Response statuses the bridge ever produces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BadRequest,
    PayloadTooLarge,
    HeaderFieldsTooLarge,
    InternalServerError,
    NotImplemented,
    BadGateway,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::BadRequest => 400,
            Status::PayloadTooLarge => 413,
            Status::HeaderFieldsTooLarge => 431,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
            Status::BadGateway => 502,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::BadRequest => "Bad Request",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::HeaderFieldsTooLarge => "Request Header Fields Too Large",
            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
            Status::BadGateway => "Bad Gateway",
        }
    }

    /// Minimal bodiless response that also ends the connection.
    pub fn response_bytes(self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            self.code(),
            self.reason()
        )
        .into_bytes()
    }
}
