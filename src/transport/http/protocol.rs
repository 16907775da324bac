//! Minimal HTTP/1.1 wire handling.
//!
//! Requests are read and responses written over any async byte stream, so
//! the plaintext and TLS transports share one implementation. Size limits
//! are enforced before buffering: the header block is capped, and a body
//! whose declared length exceeds the payload limit aborts the read without
//! a response.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Cap on the request line + header block.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Other,
}

impl Method {
    fn parse(raw: &str) -> Method {
        match raw {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            _ => Method::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

/// Failures while reading one request. All of them close the connection
/// without an HTTP response.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("idle connection timed out")]
    IdleTimeout,

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Header section too large")]
    HeadersTooLarge,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Limits applied while reading.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub payload_limit: usize,
    pub idle_timeout: Duration,
}

/// One parsed request.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: HttpVersion,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Persistent-connection semantics: HTTP/1.1 defaults to keep-alive
    /// unless the client sends `Connection: close`; HTTP/1.0 requires an
    /// explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").map(str::to_ascii_lowercase);
        match self.version {
            HttpVersion::Http11 => connection.as_deref() != Some("close"),
            HttpVersion::Http10 => connection.as_deref() == Some("keep-alive"),
        }
    }
}

/// Read one request from the stream.
///
/// Returns `Ok(None)` on clean end-of-stream before the first byte. The
/// idle timeout covers only the wait for that first byte; once the client
/// has started sending, the read runs untimed so request processing is
/// never killed by the idle timer.
pub async fn read_request<S>(stream: &mut S, limits: &ReadLimits) -> Result<Option<Request>, ReadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; READ_CHUNK];

    let n = match timeout(limits.idle_timeout, stream.read(&mut chunk)).await {
        Err(_) => return Err(ReadError::IdleTimeout),
        Ok(result) => result?,
    };
    if n == 0 {
        return Ok(None);
    }
    buf.extend_from_slice(&chunk[..n]);

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(ReadError::HeadersTooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ReadError::Malformed("end of stream inside headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let (method, target, version, headers) = parse_head(&buf[..header_end])?;

    let content_length = match headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .map(|(_, value)| value.as_str())
    {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ReadError::Malformed("invalid content-length".into()))?,
        None => 0,
    };

    if content_length > limits.payload_limit {
        return Err(ReadError::PayloadTooLarge {
            size: content_length,
            max: limits.payload_limit,
        });
    }

    // Bytes already read past the header terminator are the body prefix.
    // Pipelined bytes beyond the declared body are not retained.
    let mut body = buf.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ReadError::Malformed("end of stream inside body".into()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method,
        target,
        version,
        headers,
        body,
    }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

type Head = (Method, String, HttpVersion, Vec<(String, String)>);

fn parse_head(head: &[u8]) -> Result<Head, ReadError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| ReadError::Malformed("header block is not valid UTF-8".into()))?;
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| ReadError::Malformed("missing request line".into()))?;
    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| ReadError::Malformed("missing method".into()))?;
    let target = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| ReadError::Malformed("missing request target".into()))?;
    let version = match parts.next() {
        Some("HTTP/1.1") => HttpVersion::Http11,
        Some("HTTP/1.0") => HttpVersion::Http10,
        other => {
            return Err(ReadError::Malformed(format!(
                "unsupported HTTP version: {}",
                other.unwrap_or("")
            )))
        }
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ReadError::Malformed(format!("invalid header line: {}", line)))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok((Method::parse(method), target.to_string(), version, headers))
}

/// One response, written as HTTP/1.1 with an explicit content length.
#[derive(Debug)]
pub struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
            keep_alive: false,
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
            keep_alive: false,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub async fn write_to<S>(&self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&self.body).await?;
        stream.flush().await
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
