//! Subprocess execution behind a narrow trait so dispatch can be tested without real processes.
//!
//! `SystemRunner` spawns the program in its own process group, feeds the optional stdin
//! payload from a writer thread, captures stdout/stderr incrementally on reader threads and
//! waits for exit. With a timeout set, a child still running at the deadline is killed
//! together with its process group (`npx` leaves a `node` grandchild holding the pipes).
//! After the child itself exits, anything left in its group that still holds stdout or
//! stderr gets until the same deadline (at least `DRAIN_GRACE` without one) before the
//! group is killed, so a backgrounded grandchild cannot stall the request.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use crate::errors::BridgeError;
use crate::logging::log_excerpt;

/// How long output pipes may stay open after the child exited when no deadline is set.
const DRAIN_GRACE: Duration = Duration::from_millis(250);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// One subprocess to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed. `None` means no stdin at all.
    pub stdin: Option<Vec<u8>>,
    /// Force-kill deadline. `None` runs to completion.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How the child ended: an exit code, or a terminating signal (code is then `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn code(code: i32) -> Self {
        ExitOutcome {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        ExitOutcome {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        ExitOutcome {
            code: status.code(),
            signal,
        }
    }
}

/// Everything captured from a finished (or killed) child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit: ExitOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The deadline fired and the child, or what was left of its process group, was killed.
    pub timed_out: bool,
    pub duration: Duration,
}

impl RunOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Run a subprocess to completion (or until its deadline) and report what it produced.
///
/// `Err` means the program never started or could not be waited on; a nonzero exit is a
/// successful run with a nonzero `exit`.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, inv: &Invocation) -> Result<RunOutput, BridgeError>;
}

/// Runs invocations as real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, inv: &Invocation) -> Result<RunOutput, BridgeError> {
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args);
        cmd.stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn {
            program: inv.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(pid, program = %inv.program, args = ?inv.args, "child spawned");

        let writer = match (child.stdin.take(), inv.stdin.clone()) {
            (Some(pipe), Some(payload)) => Some(spawn_stdin_writer(pipe, payload, pid)),
            _ => None,
        };
        let stdout_reader = child
            .stdout
            .take()
            .map(|pipe| spawn_capture(pipe, "stdout", pid));
        let stderr_reader = child
            .stderr
            .take()
            .map(|pipe| spawn_capture(pipe, "stderr", pid));

        let waited = match inv.timeout {
            Some(timeout) => match child.wait_timeout(timeout) {
                Ok(Some(status)) => Ok((status, false)),
                Ok(None) => {
                    tracing::warn!(
                        pid,
                        timeout_ms = timeout.as_millis() as u64,
                        "child exceeded timeout; killing"
                    );
                    force_kill(&mut child);
                    child.wait().map(|status| (status, true))
                }
                Err(e) => Err(e),
            },
            None => child.wait().map(|status| (status, false)),
        };
        let (status, mut timed_out) = match waited {
            Ok(pair) => pair,
            Err(e) => {
                force_kill(&mut child);
                let _ = child.wait();
                return Err(BridgeError::Io(e));
            }
        };

        if !timed_out {
            let floor = Instant::now() + DRAIN_GRACE;
            let until = inv
                .timeout
                .map(|t| (started + t).max(floor))
                .unwrap_or(floor);
            if !pipes_closed_by(&[&stdout_reader, &stderr_reader], until) {
                // Some group member still holds the pipes, so the group id is still in use.
                tracing::warn!(pid, "child exited but its process group keeps the output open; killing group");
                kill_group(pid);
                timed_out = inv.timeout.is_some();
            }
        }

        if let Some(handle) = writer {
            let _ = handle.join();
        }
        let stdout = join_capture(stdout_reader);
        let stderr = join_capture(stderr_reader);

        Ok(RunOutput {
            exit: ExitOutcome::from_status(status),
            stdout,
            stderr,
            timed_out,
            duration: started.elapsed(),
        })
    }
}

fn spawn_stdin_writer<W: Write + Send + 'static>(
    mut pipe: W,
    payload: Vec<u8>,
    pid: u32,
) -> JoinHandle<()> {
    thread::spawn(move || {
        // A child that exits without reading stdin yields EPIPE here; that is not an error
        // for the request, its exit status tells the story.
        if let Err(e) = pipe.write_all(&payload).and_then(|_| pipe.flush()) {
            tracing::debug!(pid, error = %e, "stdin write failed");
        }
        // dropping the pipe closes the child's stdin
    })
}

fn spawn_capture<R: Read + Send + 'static>(
    mut pipe: R,
    stream: &'static str,
    pid: u32,
) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    tracing::debug!(pid, stream, chunk = %log_excerpt(&buf[..n]), "child output");
                    captured.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(pid, stream, error = %e, "child pipe read failed");
                    break;
                }
            }
        }
        captured
    })
}

/// Poll until every capture thread has seen EOF or `until` passes.
fn pipes_closed_by(readers: &[&Option<JoinHandle<Vec<u8>>>], until: Instant) -> bool {
    loop {
        let closed = readers
            .iter()
            .all(|r| r.as_ref().map_or(true, |h| h.is_finished()));
        if closed {
            return true;
        }
        if Instant::now() >= until {
            return false;
        }
        thread::sleep(DRAIN_POLL);
    }
}

fn join_capture(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

/// SIGKILL the child's process group. The child has not been reaped yet, so its pid (and
/// group id) cannot have been reused.
fn force_kill(child: &mut Child) {
    if !kill_group(child.id()) {
        let _ = child.kill();
    }
}

/// SIGKILL every process in the group led by `pid`. False when nothing was signalled.
fn kill_group(pid: u32) -> bool {
    #[cfg(unix)]
    {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pid, error = %e, "killpg failed");
                false
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[test]
    fn test_captures_stdout_stderr_and_code() {
        let out = SystemRunner
            .run(&sh("printf hello; printf boom >&2; exit 3"))
            .expect("run");
        assert_eq!(out.exit, ExitOutcome::code(3));
        assert_eq!(out.stdout_str(), "hello");
        assert_eq!(out.stderr_str(), "boom");
        assert!(!out.timed_out);
    }

    #[test]
    fn test_stdin_payload_is_delivered_and_closed() {
        let inv = sh("cat").stdin(b"{\"jsonrpc\":\"2.0\"}".to_vec());
        let out = SystemRunner.run(&inv).expect("run");
        assert!(out.exit.success());
        assert_eq!(out.stdout, b"{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn test_args_are_passed_verbatim() {
        let inv = sh("for a in \"$@\"; do printf '%s|' \"$a\"; done")
            .args(["sh", "compute", "instances list", ""]);
        let out = SystemRunner.run(&inv).expect("run");
        assert_eq!(out.stdout_str(), "compute|instances list||");
    }

    #[test]
    fn test_timeout_kills_child() {
        let inv = sh("sleep 30").timeout(Some(Duration::from_millis(200)));
        let out = SystemRunner.run(&inv).expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit.code, None);
        assert_eq!(out.exit.signal, Some(9));
        assert!(out.duration < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_reaches_grandchildren() {
        // The background sleep keeps stdout open; killing only `sh` would hang the reader.
        let inv = sh("sleep 30 & wait").timeout(Some(Duration::from_millis(200)));
        let out = SystemRunner.run(&inv).expect("run");
        assert!(out.timed_out);
        assert!(out.duration < Duration::from_secs(10));
    }

    #[test]
    fn test_backgrounded_grandchild_is_cut_at_deadline() {
        // `sh` exits at once; the background sleep inherits stdout and would hold it for 30s.
        let inv = sh("sleep 30 & echo hi").timeout(Some(Duration::from_millis(300)));
        let out = SystemRunner.run(&inv).expect("run");
        assert!(out.duration < Duration::from_secs(10), "took {:?}", out.duration);
        assert!(out.exit.success());
        assert!(out.timed_out);
        assert_eq!(out.stdout_str(), "hi\n");
    }

    #[test]
    fn test_backgrounded_grandchild_without_deadline_is_cut_after_grace() {
        let inv = sh("sleep 30 & echo hi");
        let out = SystemRunner.run(&inv).expect("run");
        assert!(out.duration < Duration::from_secs(10), "took {:?}", out.duration);
        assert!(!out.timed_out);
        assert_eq!(out.stdout_str(), "hi\n");
    }

    #[test]
    fn test_fast_child_beats_timeout() {
        let inv = sh("echo done").timeout(Some(Duration::from_secs(10)));
        let out = SystemRunner.run(&inv).expect("run");
        assert!(!out.timed_out);
        assert!(out.exit.success());
        assert_eq!(out.stdout_str(), "done\n");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = SystemRunner
            .run(&Invocation::new("definitely-not-a-real-program-7f3a"))
            .expect_err("spawn should fail");
        match err {
            BridgeError::Spawn { program, source } => {
                assert_eq!(program, "definitely-not-a-real-program-7f3a");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
