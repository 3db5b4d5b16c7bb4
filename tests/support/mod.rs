/*!
Test support helpers shared across integration tests.

- start_bridge(cfg): start a server on an ephemeral loopback port
- fake_program(dir, name, body): write an executable shell script standing in for gcloud/npx
- http_send_raw / http_request: raw TCP HTTP clients returning the parsed response

Requests are written by hand so tests control exact framing (CRLF vs LF, chunked, etc.).
*/

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gcloud_mcp_bridge::{start_server, BridgeConfig, ServerHandle};

/// A parsed HTTP response: status, raw header block, body bytes.
#[allow(dead_code)]
pub struct RawResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
    pub raw: Vec<u8>,
}

#[allow(dead_code)]
impl RawResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            if k.trim().eq_ignore_ascii_case(name) {
                Some(v.trim().to_string())
            } else {
                None
            }
        })
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.body_text()))
    }

    /// Number of status lines on the wire; always 1 for a well-behaved server.
    pub fn status_line_count(&self) -> usize {
        String::from_utf8_lossy(&self.raw).matches("HTTP/1.1 ").count()
    }
}

/// Config bound to 127.0.0.1 on an ephemeral port with the given programs.
#[allow(dead_code)]
pub fn test_config(cli: &Path, helper: &Path) -> BridgeConfig {
    BridgeConfig {
        port: 0,
        bind_addr: "127.0.0.1".to_string(),
        cli_program: cli.display().to_string(),
        helper_program: helper.display().to_string(),
        helper_args: String::new(),
        ..BridgeConfig::default()
    }
}

#[allow(dead_code)]
pub fn start_bridge(cfg: BridgeConfig) -> ServerHandle {
    start_server(cfg).expect("server should start")
}

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
#[allow(dead_code)]
pub fn fake_program(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Send `request` verbatim and read until the server closes the connection.
#[allow(dead_code)]
pub fn http_send_raw(port: u16, request: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .expect("set read timeout");
    stream.write_all(request).expect("write failed");
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    parse_response(buf)
}

/// Build a request with Content-Length framing and send it.
#[allow(dead_code)]
pub fn http_request(port: u16, method: &str, path: &str, body: &[u8]) -> RawResponse {
    let mut req = format!(
        "{method} {path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    req.extend_from_slice(body);
    http_send_raw(port, &req)
}

#[allow(dead_code)]
pub fn http_get(port: u16, path: &str) -> RawResponse {
    http_request(port, "GET", path, b"")
}

#[allow(dead_code)]
pub fn http_post(port: u16, body: &str) -> RawResponse {
    http_request(port, "POST", "/", body.as_bytes())
}

#[allow(dead_code)]
fn parse_response(buf: Vec<u8>) -> RawResponse {
    let pos = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or_else(|| panic!("no header terminator in {:?}", String::from_utf8_lossy(&buf)));
    let headers = String::from_utf8_lossy(&buf[..pos]).to_string();
    let status = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);
    let body = buf[pos + 4..].to_vec();
    RawResponse {
        status,
        headers,
        body,
        raw: buf,
    }
}
