/*!
Listener and accept loop.

- Binds a TCP listener (port 0 picks a free port, which the tests rely on).
- Non-blocking accept loop that polls a shared running flag so `shutdown` can stop it.
- One worker thread per connection: read the request, dispatch, write exactly one response.
- Accepted sockets get the configured read timeout, so a stalled client cannot pin a worker.
*/

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::errors::BridgeError;
use crate::http::{self, ReadError};
use crate::process::{ProcessRunner, SystemRunner};
use crate::response::{Responder, Response};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// A running server. Dropping the handle leaves the server running; call `shutdown` to stop.
pub struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting and wait for the accept loop to exit. In-flight requests finish on
    /// their own threads.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }

    /// Block until the accept loop exits.
    pub fn wait(self) {
        let _ = self.handle.join();
    }
}

/// Start serving with real subprocesses.
pub fn start_server(config: BridgeConfig) -> Result<ServerHandle, BridgeError> {
    start_server_with(Dispatcher::new(SystemRunner, config))
}

/// Start serving with any runner.
pub fn start_server_with<R: ProcessRunner + 'static>(
    dispatcher: Dispatcher<R>,
) -> Result<ServerHandle, BridgeError> {
    let bind = dispatcher.config().listen_addr();
    let listener = TcpListener::bind(&bind)
        .map_err(|e| BridgeError::Message(format!("bind {bind} failed: {e}")))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_cl = running.clone();
    let dispatcher = Arc::new(dispatcher);

    let handle = std::thread::Builder::new()
        .name("bridge-accept".to_string())
        .spawn(move || {
            tracing::debug!(%addr, "accept loop started");
            while running_cl.load(Ordering::SeqCst) {
                let (stream, peer) = match listener.accept() {
                    Ok(pair) => pair,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_BACKOFF);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        std::thread::sleep(ACCEPT_BACKOFF);
                        continue;
                    }
                };
                let d = dispatcher.clone();
                let spawned = std::thread::Builder::new()
                    .name("bridge-conn".to_string())
                    .spawn(move || handle_connection(&d, stream, peer));
                if let Err(e) = spawned {
                    tracing::error!(%peer, error = %e, "failed to start connection thread");
                }
            }
            tracing::info!(%addr, "server stopped");
        })?;

    Ok(ServerHandle {
        addr,
        running,
        handle,
    })
}

fn handle_connection<R: ProcessRunner>(dispatcher: &Dispatcher<R>, mut stream: TcpStream, peer: SocketAddr) {
    // Accepted sockets may inherit non-blocking mode from the listener on some platforms.
    if let Err(e) = stream.set_nonblocking(false) {
        tracing::warn!(%peer, error = %e, "cannot switch connection to blocking mode");
        return;
    }
    if let Err(e) = stream.set_read_timeout(dispatcher.config().read_timeout()) {
        tracing::warn!(%peer, error = %e, "cannot set read timeout");
        return;
    }
    let mut reader = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "cannot clone connection");
            return;
        }
    };

    let read = http::read_http_request(&mut reader, &mut stream, dispatcher.config().max_body_bytes);
    let mut responder = Responder::new(stream);
    let resp = match read {
        Ok(req) => dispatcher.dispatch(&req),
        Err(ReadError::Closed) => return,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "rejecting request");
            read_error_response(&e)
        }
    };

    match responder.send(&resp) {
        Ok(_) => {}
        Err(e) => tracing::debug!(%peer, error = %e, "client went away before response"),
    }
    let mut stream = responder.into_inner();
    let _ = stream.flush();
    let _ = stream.shutdown(std::net::Shutdown::Write);
}

fn read_error_response(e: &ReadError) -> Response {
    match e {
        ReadError::TooLarge(_) => Response::text(413, "payload too large\n"),
        ReadError::HeadersTooLarge => Response::text(431, "request headers too large\n"),
        ReadError::TimedOut => Response::text(408, "request timeout\n"),
        _ => Response::text(400, "bad request\n"),
    }
}
