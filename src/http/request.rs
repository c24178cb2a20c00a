//! Initial request head parsing and its wire serialization for replay.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Name exactly as the client sent it.
    pub name: String,
    pub value: Vec<u8>,
}

/// The request that opened a connection, kept verbatim enough to be
/// replayed onto the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    /// Minor HTTP version: `1` for HTTP/1.1, `0` for HTTP/1.0.
    pub minor_version: u8,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

/// Framing facts pulled out of a parsed head.
#[derive(Debug, PartialEq, Eq)]
pub struct Head {
    pub request: Request,
    /// Bytes consumed by the request line and headers, blank line included.
    pub len: usize,
    pub content_length: usize,
}

/// Try to parse a request head from the front of `buf`.
///
/// Returns `Ok(None)` while the head is still incomplete.
pub fn parse_head(buf: &[u8]) -> Result<Option<Head>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HeaderTooLarge(buf.len())),
        Err(e) => return Err(Error::BadRequest(e.to_string())),
    };

    let request = Request {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        minor_version: req.version.unwrap_or(1),
        headers: req
            .headers
            .iter()
            .map(|h| Header {
                name: h.name.to_string(),
                value: h.value.to_vec(),
            })
            .collect(),
        body: Vec::new(),
    };

    if let Some(te) = request.header("transfer-encoding") {
        return Err(Error::UnsupportedEncoding(
            String::from_utf8_lossy(te).into_owned(),
        ));
    }

    let content_length = match request.header("content-length") {
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::BadRequest("invalid Content-Length".into()))?,
        None => 0,
    };

    Ok(Some(Head {
        request,
        len,
        content_length,
    }))
}

impl Request {
    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// Serialize the request in HTTP/1.x wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.extend_from_slice(format!(" HTTP/1.{}\r\n", self.minor_version).as_bytes());
        for header in &self.headers {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(&header.value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Replay the request onto `upstream` before any relaying starts.
    pub async fn write_to<W>(&self, upstream: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let bytes = self.to_bytes();
        upstream.write_all(&bytes).await.map_err(Error::Replay)?;
        upstream.flush().await.map_err(Error::Replay)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";

    #[test]
    fn parses_upgrade_request() {
        let head = parse_head(UPGRADE).unwrap().unwrap();
        assert_eq!(head.len, UPGRADE.len());
        assert_eq!(head.content_length, 0);
        assert_eq!(head.request.method, "GET");
        assert_eq!(head.request.target, "/chat");
        assert_eq!(head.request.minor_version, 1);
        assert_eq!(head.request.header("upgrade"), Some(&b"websocket"[..]));
    }

    #[test]
    fn partial_head_needs_more_bytes() {
        assert_eq!(parse_head(b"GET /chat HTTP/1.1\r\nHost: x\r\n").unwrap(), None);
    }

    #[test]
    fn serialization_matches_received_bytes() {
        let head = parse_head(UPGRADE).unwrap().unwrap();
        assert_eq!(head.request.to_bytes(), UPGRADE);
    }

    #[test]
    fn preserves_header_case_order_and_body() {
        let raw = b"POST /submit HTTP/1.0\r\nX-Trace: a\r\ncontent-length: 5\r\nX-Trace: b\r\n\r\n";
        let mut request = parse_head(raw).unwrap().unwrap().request;
        request.body = b"hello".to_vec();

        let mut expected = raw.to_vec();
        expected.extend_from_slice(b"hello");
        assert_eq!(request.to_bytes(), expected);
    }

    #[test]
    fn reads_content_length() {
        let head = parse_head(b"POST / HTTP/1.1\r\nContent-Length: 12\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.content_length, 12);
    }

    #[test]
    fn rejects_bad_content_length() {
        let err = parse_head(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn rejects_chunked_requests() {
        let err =
            parse_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_head(b"\x16\x03\x01\x02\x00\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn write_to_replays_exact_bytes() {
        let request = parse_head(UPGRADE).unwrap().unwrap().request;
        let mut sink = Vec::new();
        request.write_to(&mut sink).await.unwrap();
        assert_eq!(sink, UPGRADE);
    }
}
