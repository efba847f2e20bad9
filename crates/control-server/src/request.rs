//! Bounded HTTP/1.1 request parser

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size caps applied while parsing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLimits {
    pub max_method: usize,
    pub max_path: usize,
    /// Longer values are truncated, not rejected
    pub max_content_type: usize,
    pub max_body: usize,
    /// Request line plus headers
    pub max_header: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_method: 16,
            max_path: 256,
            max_content_type: 64,
            max_body: 4096,
            max_header: 8192,
        }
    }
}

/// Why a request was rejected; every variant maps to a 400
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Malformed request: {0}")]
    Malformed(&'static str),

    #[error("Request headers too large")]
    HeaderTooLarge,

    #[error("Request body too large ({0} bytes)")]
    BodyTooLarge(usize),

    #[error("Invalid Content-Length")]
    InvalidContentLength,

    #[error("Connection closed mid-request")]
    Truncated,
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target as sent, including any query string
    pub target: String,
    pub content_type: Option<String>,
    pub origin: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Target without the query string
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse a request from the bytes received so far.
///
/// `Ok(None)` means the request is not complete yet.
pub fn parse_request(buf: &[u8], limits: &RequestLimits) -> Result<Option<Request>, RequestError> {
    let Some(head_len) = find(buf, HEADER_END) else {
        if buf.len() > limits.max_header {
            return Err(RequestError::HeaderTooLarge);
        }
        return Ok(None);
    };
    if head_len > limits.max_header {
        return Err(RequestError::HeaderTooLarge);
    }

    let head = std::str::from_utf8(&buf[..head_len])
        .map_err(|_| RequestError::Malformed("headers are not UTF-8"))?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(RequestError::Malformed("empty request"))?;
    let mut parts = request_line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty());
    let target = parts.next().filter(|t| !t.is_empty());
    let version = parts.next();
    let (Some(method), Some(target), Some(version)) = (method, target, version) else {
        return Err(RequestError::Malformed("bad request line"));
    };
    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return Err(RequestError::Malformed("bad request line"));
    }
    if method.len() > limits.max_method {
        return Err(RequestError::Malformed("method too long"));
    }
    if target.len() > limits.max_path {
        return Err(RequestError::Malformed("path too long"));
    }

    let mut content_type = None;
    let mut origin = None;
    let mut content_length = 0usize;

    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or(RequestError::Malformed("bad header line"))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| RequestError::InvalidContentLength)?;
            if content_length > limits.max_body {
                return Err(RequestError::BodyTooLarge(content_length));
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(truncate(value, limits.max_content_type).to_string());
        } else if name.eq_ignore_ascii_case("origin") {
            origin = Some(truncate(value, limits.max_path).to_string());
        }
    }

    let body_start = head_len + HEADER_END.len();
    let received = buf.len() - body_start;
    if received < content_length {
        return Ok(None);
    }

    Ok(Some(Request {
        method: method.to_string(),
        target: target.to_string(),
        content_type,
        origin,
        body: buf[body_start..body_start + content_length].to_vec(),
    }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Cut at a char boundary no later than `max` bytes
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
