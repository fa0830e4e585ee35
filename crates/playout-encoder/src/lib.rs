//! External encoder (ffmpeg) invocation and process lifecycle.
//!
//! Transcoding and the RTMP/FLV push are delegated entirely to ffmpeg.
//! This crate builds the fixed argument list, launches the process with
//! its output drained, and exposes polite termination plus a forceful
//! kill so the supervisor can stop it on shutdown.

mod error;
mod ffmpeg;
mod process;
mod redact;

pub use error::EncoderError;
pub use ffmpeg::{build_args, probe_binary, FfmpegLauncher, DEFAULT_FFMPEG_BINARY};
pub use process::{EncoderProcess, STDERR_TAIL_LINES};
pub use redact::{Redactor, REDACTED};

use std::fmt;
use std::time::Duration;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Video encoding settings passed to the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProfile {
    /// Codec name (e.g. `libx264`).
    pub codec: String,

    /// Speed/quality preset.
    pub preset: String,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Maximum bitrate in kbps.
    pub max_bitrate_kbps: u32,

    /// Rate-control buffer size in kbit.
    pub buffer_kbits: u32,

    /// Output pixel format.
    pub pixel_format: String,

    /// Keyframe interval in frames.
    pub keyframe_interval_frames: u32,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            bitrate_kbps: 3000,
            max_bitrate_kbps: 3000,
            buffer_kbits: 6000,
            pixel_format: "yuv420p".to_string(),
            keyframe_interval_frames: 50,
        }
    }
}

/// Audio encoding settings passed to the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProfile {
    /// Codec name.
    pub codec: String,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate_kbps: 192,
            sample_rate: 44100,
        }
    }
}

/// Input reconnect behaviour for network sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to pass the reconnect flags at all.
    pub enabled: bool,

    /// Upper bound on the delay between reconnect attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// The complete, fixed encoding profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub video: VideoProfile,
    pub audio: AudioProfile,
    pub reconnect: ReconnectPolicy,

    /// Output container format.
    pub output_format: String,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            video: VideoProfile::default(),
            audio: AudioProfile::default(),
            reconnect: ReconnectPolicy::default(),
            output_format: "flv".to_string(),
        }
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// Outcome of a process that exited with `code`.
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Outcome of a process terminated by a signal.
    pub fn signalled() -> Self {
        Self { code: None }
    }

    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A running encoder process.
pub trait EncoderChild: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Non-blocking check for exit. Reaps the process when it has exited.
    fn try_wait(&mut self) -> EncoderResult<Option<ExitOutcome>>;

    /// Ask the process to exit (SIGTERM on unix). Must not block.
    fn terminate(&mut self) -> EncoderResult<()>;

    /// Forcefully kill the process.
    fn kill(&mut self) -> EncoderResult<()>;

    /// Block until the process exits and reap it.
    fn wait(&mut self) -> EncoderResult<ExitOutcome>;

    /// Most recent diagnostic lines written by the process.
    fn stderr_tail(&self) -> Vec<String>;
}

/// Launches one encoder process per source.
pub trait EncoderLauncher: Send + Sync {
    /// Start encoding `source` to the configured destination.
    fn launch(&self, source: &str) -> EncoderResult<Box<dyn EncoderChild>>;

    /// Launcher name for diagnostics.
    fn name(&self) -> &'static str;
}
