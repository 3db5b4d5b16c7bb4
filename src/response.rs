/*!
Outbound responses and the single-write guard.

Every connection gets exactly one `Responder`. Writing goes through `Responder::send`, which
checks the response state first: once a response has been sent (or a write has failed) any
later attempt is dropped and logged instead of putting a second status line on the wire.
*/

use std::io::{self, Write};

use serde_json::Value;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: &Value) -> Self {
        Response {
            status,
            content_type: CONTENT_TYPE_JSON,
            body: value.to_string().into_bytes(),
        }
    }

    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Response {
            status,
            content_type: CONTENT_TYPE_TEXT,
            body: body.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    #[cfg(test)]
    pub(crate) fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Serialize as an HTTP/1.1 response with Content-Length and Connection: close.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        w.write_all(header.as_bytes())?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        408 => "Request Timeout",
        404 => "Not Found",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Where a connection is in its response lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    Sent,
    /// A write was attempted and failed (usually the client went away).
    Failed,
}

/// Owns the write half of a connection and enforces one response per request.
pub struct Responder<W: Write> {
    writer: W,
    state: ResponseState,
}

impl<W: Write> Responder<W> {
    pub fn new(writer: W) -> Self {
        Responder {
            writer,
            state: ResponseState::Pending,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ResponseState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.state == ResponseState::Pending
    }

    /// Write `resp` if nothing has been written yet.
    ///
    /// Returns `Ok(true)` when the response went out, `Ok(false)` when it was dropped because
    /// the connection already has (or failed to get) a response.
    pub fn send(&mut self, resp: &Response) -> io::Result<bool> {
        if self.state != ResponseState::Pending {
            tracing::debug!(
                status = resp.status,
                state = ?self.state,
                "response already sent; dropping"
            );
            return Ok(false);
        }
        match resp.write_to(&mut self.writer) {
            Ok(()) => {
                self.state = ResponseState::Sent;
                Ok(true)
            }
            Err(e) => {
                self.state = ResponseState::Failed;
                Err(e)
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_json_response_wire_format() {
        let resp = Response::json(200, &json!({"ok": true}));
        let mut out = Vec::new();
        resp.write_to(&mut out).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {text}");
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"ok\":true}"));
    }

    #[test]
    fn test_text_response_keeps_body_verbatim() {
        let resp = Response::text(500, "boom\n");
        assert_eq!(resp.content_type, "text/plain");
        assert_eq!(resp.body_text(), "boom\n");
        assert!(resp.body_json().is_none());
    }

    #[test]
    fn test_responder_writes_once() {
        let mut r = Responder::new(Vec::new());
        assert!(r.is_pending());
        let first = Response::text(200, "first");
        let second = Response::json(500, &json!({"error": "late"}));
        assert!(r.send(&first).expect("first send"));
        assert_eq!(r.state(), ResponseState::Sent);
        assert!(!r.send(&second).expect("second send"));
        assert!(!r.send(&first).expect("third send"));
        let wire = String::from_utf8(r.into_inner()).expect("utf8");
        assert_eq!(wire.matches("HTTP/1.1 ").count(), 1);
        assert!(wire.ends_with("first"));
    }

    #[test]
    fn test_failed_write_blocks_retries() {
        let mut r = Responder::new(BrokenPipe);
        assert!(r.send(&Response::text(200, "x")).is_err());
        assert_eq!(r.state(), ResponseState::Failed);
        assert!(!r.send(&Response::text(500, "y")).expect("dropped"));
    }
}
