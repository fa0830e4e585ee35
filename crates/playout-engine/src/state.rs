//! State shared between the playlist worker and the shutdown path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use playout_encoder::{EncoderChild, EncoderError, EncoderResult, ExitOutcome};

/// Cooperative cancellation for the playlist loop.
///
/// Cancelling flips the running flag and drops the wake-up sender, which
/// ends every in-progress [`ShutdownToken::sleep`] immediately.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    running: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl ShutdownToken {
    /// Create a token in the running state.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                running: AtomicBool::new(true),
                wake_tx: Mutex::new(Some(wake_tx)),
                wake_rx,
            }),
        }
    }

    /// True until [`ShutdownToken::cancel`] is called.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Request shutdown. Returns true only for the first call.
    pub fn cancel(&self) -> bool {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.wake_tx.lock().take();
        was_running
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns true if the full duration elapsed while still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }

        match self.inner.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_running(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of polling the current encoder.
pub(crate) enum ChildStatus {
    /// No encoder is installed.
    Absent,

    /// The encoder is still running.
    Running,

    /// The encoder exited and has been removed from the slot.
    Exited {
        outcome: ExitOutcome,
        stderr_tail: Vec<String>,
    },
}

/// The encoder process currently streaming, if any.
///
/// The process stays in the slot until it has been reaped, so the
/// shutdown path can always signal a live pid.
#[derive(Default)]
pub struct CurrentChild {
    slot: Mutex<Option<Box<dyn EncoderChild>>>,
}

impl CurrentChild {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly launched encoder.
    pub(crate) fn install(&self, child: Box<dyn EncoderChild>) {
        let previous = self.slot.lock().replace(child);
        debug_assert!(previous.is_none(), "an encoder was already installed");
    }

    /// Pid of the tracked encoder.
    pub fn pid(&self) -> Option<u32> {
        self.slot.lock().as_ref().map(|child| child.id())
    }

    /// Ask the tracked encoder to exit without waiting for it.
    ///
    /// Returns true if a termination request was delivered.
    pub fn request_termination(&self) -> bool {
        match self.slot.lock().as_mut() {
            Some(child) => child.terminate().is_ok(),
            None => false,
        }
    }

    /// Check whether the tracked encoder has exited, removing it if so.
    ///
    /// The slot lock is released before the exited child's stderr tail is
    /// read, so a concurrent termination request never waits on it.
    pub(crate) fn poll(&self) -> EncoderResult<ChildStatus> {
        let (child, outcome) = {
            let mut slot = self.slot.lock();
            let Some(child) = slot.as_mut() else {
                return Ok(ChildStatus::Absent);
            };

            match child.try_wait() {
                Ok(Some(outcome)) => match slot.take() {
                    Some(child) => (child, outcome),
                    None => return Ok(ChildStatus::Absent),
                },
                Ok(None) => return Ok(ChildStatus::Running),
                Err(e) => {
                    let child = slot.take();
                    drop(slot);
                    discard(child);
                    return Err(e);
                }
            }
        };

        Ok(ChildStatus::Exited {
            outcome,
            stderr_tail: child.stderr_tail(),
        })
    }

    /// Kill and reap the tracked encoder.
    pub(crate) fn force_kill(&self) -> EncoderResult<Option<ExitOutcome>> {
        let Some(mut child) = self.slot.lock().take() else {
            return Ok(None);
        };

        child.kill()?;
        child.wait().map(Some)
    }
}

fn discard(child: Option<Box<dyn EncoderChild>>) {
    if let Some(mut child) = child {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for CurrentChild {
    fn drop(&mut self) {
        discard(self.slot.get_mut().take());
    }
}

/// Build the error used when the slot is unexpectedly empty.
pub(crate) fn missing_child() -> EncoderError {
    EncoderError::Wait(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "encoder handle disappeared while waiting",
    ))
}
