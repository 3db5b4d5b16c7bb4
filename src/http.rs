/*!
HTTP helpers for the bridge: tolerant request parsing and route classification.

A minimal request model plus a parser that reads a single HTTP/1.x request from a Read
stream. Headers may be terminated by CRLFCRLF or LFLF and are capped at 64 KiB. The body
is read in full (Content-Length or chunked transfer coding) before dispatch, bounded by a
caller-supplied limit. Clients that send `Expect: 100-continue` get the interim
`100 Continue` before the body is read.
*/

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};

const HDR_CAP: usize = 64 * 1024;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Supported HTTP methods (minimal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Other(m) => m.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three things a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Health,
    Diag,
    /// Everything else: direct CLI command or stdin relay, decided from the body.
    Relay,
}

/// Simple case-insensitive header map (keys lowercased)
pub type HeaderMap = HashMap<String, String>;

/// Parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target as sent by the client (used for logs).
    pub target: String,
    /// Target with any query, fragment or `;` suffix removed.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Build a request without going through the wire parser.
    pub fn new(method: Method, target: &str, body: impl Into<Vec<u8>>) -> Self {
        HttpRequest {
            method,
            target: target.to_string(),
            path: normalize_path(target),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn route(&self) -> Route {
        classify_route(&self.method, &self.path)
    }
}

/// Why a request could not be read.
#[derive(Debug)]
pub enum ReadError {
    /// Peer closed the connection before sending anything.
    Closed,
    HeadersTooLarge,
    BadRequest(String),
    /// Body exceeds the configured limit (in bytes).
    TooLarge(usize),
    /// The socket read timeout fired partway through the request.
    TimedOut,
    Io(io::Error),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ReadError::TimedOut,
            _ => ReadError::Io(e),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Closed => f.write_str("connection closed before request"),
            ReadError::HeadersTooLarge => f.write_str("request headers too large"),
            ReadError::BadRequest(why) => write!(f, "bad request: {why}"),
            ReadError::TooLarge(limit) => write!(f, "request body exceeds {limit} bytes"),
            ReadError::TimedOut => f.write_str("timed out waiting for request data"),
            ReadError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

/// Parse a single HTTP request from a reader, reading the whole body.
///
/// `interim` is the write side of the same connection; it only ever receives
/// `100 Continue`.
pub fn read_http_request<R: Read, W: Write>(
    reader: &mut R,
    interim: &mut W,
    max_body: usize,
) -> Result<HttpRequest, ReadError> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let mut end_of_headers: Option<usize> = None;

    // Read until we find the end of headers or hit the cap/EOF
    while end_of_headers.is_none() {
        if buf.len() >= HDR_CAP {
            return Err(ReadError::HeadersTooLarge);
        }
        let n = match reader.read(&mut tmp) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(match ReadError::from(e) {
                    // idle connection that never started a request
                    ReadError::TimedOut if buf.is_empty() => ReadError::Closed,
                    other => other,
                })
            }
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        end_of_headers = header_end(&buf);
    }

    let end = match end_of_headers {
        Some(end) => end,
        None if buf.iter().all(|b| b.is_ascii_whitespace()) => return Err(ReadError::Closed),
        None => {
            return Err(ReadError::BadRequest(
                "incomplete request headers".to_string(),
            ))
        }
    };

    let header_str = String::from_utf8_lossy(&buf[..end]).to_string();
    let mut lines = header_str.lines();
    let request_line = lines.next().unwrap_or_default().trim();
    let (method, target) = parse_request_line(request_line)?;
    let headers = parse_headers(lines);

    // Bytes already read past the header terminator belong to the body.
    let leftover = buf[end..].to_vec();
    let wants_continue = leftover.is_empty()
        && headers
            .get("expect")
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("100-continue"));
    let mut body_reader = io::Cursor::new(leftover).chain(reader);

    let chunked = headers
        .get("transfer-encoding")
        .map(|s| s.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let body = if chunked {
        if wants_continue {
            send_continue(interim)?;
        }
        read_chunked_body(&mut BufReader::new(body_reader), max_body)?
    } else {
        let len = content_length(&headers)?;
        if len > max_body {
            return Err(ReadError::TooLarge(max_body));
        }
        if wants_continue && len > 0 {
            send_continue(interim)?;
        }
        read_sized_body(&mut body_reader, len)?
    };

    Ok(HttpRequest {
        path: normalize_path(&target),
        method,
        target,
        headers,
        body,
    })
}

fn send_continue<W: Write>(w: &mut W) -> Result<(), ReadError> {
    w.write_all(CONTINUE)?;
    w.flush()?;
    Ok(())
}

/// Index just past the first blank line, whichever of CRLFCRLF or LFLF comes first.
fn header_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        let rest = &buf[i + 1..];
        if rest.starts_with(b"\n") {
            Some(i + 2)
        } else if rest.starts_with(b"\r\n") {
            Some(i + 3)
        } else {
            None
        }
    })
}

/// Classify a method + normalized path into a route.
pub fn classify_route(method: &Method, path: &str) -> Route {
    match (method, path) {
        (Method::Get, "/health") => Route::Health,
        (Method::Get, "/diag") => Route::Diag,
        _ => Route::Relay,
    }
}

/// Strip query, fragment, or accidental `;` suffixes from a request target.
pub fn normalize_path(target: &str) -> String {
    let path = target
        .split(|c: char| matches!(c, '?' | '#' | ';'))
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn parse_request_line(request_line: &str) -> Result<(Method, String), ReadError> {
    let mut parts = request_line.split_whitespace();
    let method = match parts.next() {
        Some(m) => match m.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        },
        None => return Err(ReadError::BadRequest("empty request line".to_string())),
    };
    let target = parts.next().unwrap_or("/").to_string();
    Ok((method, target))
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    map
}

fn content_length(headers: &HeaderMap) -> Result<usize, ReadError> {
    match headers.get("content-length") {
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| ReadError::BadRequest(format!("invalid Content-Length: {v}"))),
        None => Ok(0),
    }
}

fn read_sized_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, ReadError> {
    let mut body = Vec::with_capacity(len.min(64 * 1024));
    reader.by_ref().take(len as u64).read_to_end(&mut body)?;
    if body.len() < len {
        return Err(ReadError::BadRequest(format!(
            "body ended after {} of {} bytes",
            body.len(),
            len
        )));
    }
    Ok(body)
}

fn read_chunked_body<B: BufRead>(reader: &mut B, max_body: usize) -> Result<Vec<u8>, ReadError> {
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(ReadError::BadRequest("truncated chunked body".to_string()));
        }
        let ln = line.trim();
        if ln.is_empty() {
            // CRLF that closes the previous chunk payload
            continue;
        }
        // Chunk size is hex; extensions after ';' are ignored
        let size_hex = ln.split(';').next().unwrap_or(ln).trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ReadError::BadRequest(format!("invalid chunk size: {size_hex}")))?;
        if size == 0 {
            // Consume trailers until blank line or EOF
            loop {
                line.clear();
                if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if body.len().saturating_add(size) > max_body {
            return Err(ReadError::TooLarge(max_body));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ReadError::BadRequest("truncated chunk payload".to_string())
            } else {
                ReadError::from(e)
            }
        })?;
    }
}
