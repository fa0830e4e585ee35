//! Encoder child process wrapper.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::EncoderError;
use crate::redact::Redactor;
use crate::{EncoderChild, EncoderResult, ExitOutcome};

/// Number of stderr lines kept for failure diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the stderr reader to hit EOF after exit.
const DRAIN_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// A spawned encoder process whose stderr is drained on a helper thread.
///
/// stdin and stdout are detached so the child can never block on a full
/// pipe. Every stderr line is passed through a [`Redactor`] before it is
/// traced or kept. Dropping a process that has not been reaped kills and
/// reaps it.
pub struct EncoderProcess {
    child: Child,
    tail: Arc<Mutex<VecDeque<String>>>,
    drain: Option<JoinHandle<()>>,
    exited: Option<ExitOutcome>,
}

impl EncoderProcess {
    /// Spawn `command` with stdio redirected for unattended running.
    pub fn spawn(mut command: Command, redactor: Redactor) -> EncoderResult<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(EncoderError::Spawn)?;
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let drain = match child.stderr.take() {
            Some(stderr) => {
                let tail = Arc::clone(&tail);
                let pid = child.id();
                let handle = thread::Builder::new()
                    .name(format!("encoder-stderr-{pid}"))
                    .spawn(move || drain_stderr(stderr, tail, redactor))
                    .map_err(EncoderError::Spawn);
                match handle {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        debug!(pid = child.id(), "Encoder process spawned");

        Ok(Self {
            child,
            tail,
            drain,
            exited: None,
        })
    }

    fn record_exit(&mut self, outcome: ExitOutcome) -> ExitOutcome {
        self.exited = Some(outcome);
        outcome
    }

    /// Give the reader a moment to collect the final lines after exit.
    fn settle_drain(&self) {
        let Some(handle) = self.drain.as_ref() else {
            return;
        };
        if self.exited.is_none() {
            return;
        }

        let deadline = Instant::now() + DRAIN_SETTLE_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if !handle.is_finished() {
            // A grandchild still holds the pipe open.
            debug!("stderr reader still busy after encoder exit");
        }
    }
}

impl EncoderChild for EncoderProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> EncoderResult<Option<ExitOutcome>> {
        if let Some(outcome) = self.exited {
            return Ok(Some(outcome));
        }

        match self.child.try_wait().map_err(EncoderError::Wait)? {
            Some(status) => Ok(Some(self.record_exit(status.into()))),
            None => Ok(None),
        }
    }

    fn terminate(&mut self) -> EncoderResult<()> {
        if self.exited.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
                .map_err(|e| EncoderError::Signal(e.to_string()))
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| EncoderError::Signal(e.to_string()))
        }
    }

    fn kill(&mut self) -> EncoderResult<()> {
        if self.exited.is_some() {
            return Ok(());
        }

        self.child
            .kill()
            .map_err(|e| EncoderError::Signal(e.to_string()))
    }

    fn wait(&mut self) -> EncoderResult<ExitOutcome> {
        if let Some(outcome) = self.exited {
            return Ok(outcome);
        }

        let status = self.child.wait().map_err(EncoderError::Wait)?;
        Ok(self.record_exit(status.into()))
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.settle_drain();
        self.tail.lock().iter().cloned().collect()
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if self.exited.is_none() {
            warn!(pid = self.child.id(), "Dropping live encoder process, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }

        if let Some(handle) = self.drain.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// Read stderr until EOF, keeping the last few lines.
///
/// ffmpeg rewrites progress lines with `\r`, so only the last segment of
/// each physical line is kept.
fn drain_stderr<R: Read>(stderr: R, tail: Arc<Mutex<VecDeque<String>>>, redactor: Redactor) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text
                    .split('\r')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .last();

                if let Some(line) = line {
                    let line = redactor.apply(line);
                    trace!(target: "encoder", "{}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.into_owned());
                }
            }
            Err(e) => {
                debug!("Error reading encoder stderr: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_drain_keeps_last_segment_and_bounds_tail() {
        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let mut input = String::new();
        for i in 0..30 {
            input.push_str(&format!("frame={i}\rline {i}\n"));
        }
        drain_stderr(input.as_bytes(), Arc::clone(&tail), Redactor::none());

        let tail = tail.lock();
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.back().map(String::as_str), Some("line 29"));
        assert_eq!(tail.front().map(String::as_str), Some("line 10"));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_and_stderr_captured() {
        let mut process = EncoderProcess::spawn(
            shell("echo 'Connection refused' >&2; exit 3"),
            Redactor::none(),
        )
        .unwrap();
        let outcome = process.wait().unwrap();

        assert_eq!(outcome, ExitOutcome::from_code(3));
        assert!(!outcome.success());
        assert_eq!(process.stderr_tail(), vec!["Connection refused".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_exit() {
        let mut process = EncoderProcess::spawn(shell("exit 0"), Redactor::none()).unwrap();
        assert!(process.wait().unwrap().success());
        // Reaped processes report the cached outcome.
        assert!(process.try_wait().unwrap().unwrap().success());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_stops_long_running_process() {
        let mut process = EncoderProcess::spawn(shell("exec sleep 30"), Redactor::none()).unwrap();
        assert!(process.try_wait().unwrap().is_none());

        process.terminate().unwrap();
        let outcome = process.wait().unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.code, None);

        // Signalling an already reaped process is a no-op.
        process.terminate().unwrap();
        process.kill().unwrap();
    }

    #[test]
    fn test_drain_masks_secrets_before_keeping_lines() {
        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let input = "Opening output\nrtmp://a.rtmp.youtube.com/live2/SECRET-KEY-123: Input/output error\n";
        drain_stderr(input.as_bytes(), Arc::clone(&tail), Redactor::new(["SECRET-KEY-123"]));

        let tail = tail.lock();
        assert_eq!(
            tail.back().map(String::as_str),
            Some("rtmp://a.rtmp.youtube.com/live2/****: Input/output error")
        );
        assert!(tail.iter().all(|line| !line.contains("SECRET-KEY-123")));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_encoder_tail_hides_stream_key() {
        let mut process = EncoderProcess::spawn(
            shell("echo \"rtmp://a.rtmp.youtube.com/live2/SECRET-KEY-123: Input/output error\" >&2; exit 1"),
            Redactor::new(["SECRET-KEY-123"]),
        )
        .unwrap();

        assert!(!process.wait().unwrap().success());
        let tail = process.stderr_tail();
        assert_eq!(tail.len(), 1);
        assert!(!tail[0].contains("SECRET-KEY-123"));
        assert!(tail[0].contains("/live2/****"));
    }

    #[cfg(unix)]
    #[test]
    fn test_try_wait_does_not_block_on_open_stderr() {
        // The background sleep inherits stderr and keeps the pipe open.
        let mut process =
            EncoderProcess::spawn(shell("sleep 3 >&2 & exit 0"), Redactor::none()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            let start = Instant::now();
            let polled = process.try_wait().unwrap();
            assert!(start.elapsed() < Duration::from_millis(100));
            if let Some(outcome) = polled {
                break outcome;
            }
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        };
        assert!(outcome.success());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let result = EncoderProcess::spawn(Command::new("/definitely/not/an/encoder"), Redactor::none());
        assert!(matches!(result, Err(EncoderError::Spawn(_))));
    }
}
