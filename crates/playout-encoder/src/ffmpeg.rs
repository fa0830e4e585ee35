//! ffmpeg command construction and launching.

use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, instrument};

use crate::error::EncoderError;
use crate::process::EncoderProcess;
use crate::redact::Redactor;
use crate::{EncoderChild, EncoderLauncher, EncoderProfile, EncoderResult};

/// Binary looked up on `PATH` when none is configured.
pub const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";

/// Check that the encoder binary runs and return its version line.
pub fn probe_binary(binary: impl AsRef<OsStr>) -> EncoderResult<String> {
    let binary = binary.as_ref();
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .map_err(|e| EncoderError::BinaryNotFound(format!("{}: {}", binary.to_string_lossy(), e)))?;

    if !output.status.success() {
        return Err(EncoderError::BinaryNotFound(format!(
            "{}: -version exited with {}",
            binary.to_string_lossy(),
            output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "unknown version".to_string());

    Ok(version)
}

/// Whether input reconnect options apply to `source`.
fn is_network_source(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Build the encoder argument list for one source.
///
/// The destination is the last argument.
pub fn build_args(profile: &EncoderProfile, source: &str, destination: &str) -> Vec<String> {
    let video = &profile.video;
    let audio = &profile.audio;
    let mut args = Vec::with_capacity(40);

    // 1. Unattended, quiet operation
    args.extend(["-hide_banner", "-nostdin", "-nostats"].map(String::from));

    // 2. Input reconnect options (http demuxer only)
    if profile.reconnect.enabled && is_network_source(source) {
        args.extend([
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_at_eof".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            profile.reconnect.max_delay.as_secs().max(1).to_string(),
        ]);
    }

    // 3. Input at native frame rate
    args.extend(["-re".to_string(), "-i".to_string(), source.to_string()]);

    // 4. Video
    args.extend([
        "-c:v".to_string(),
        video.codec.clone(),
        "-preset".to_string(),
        video.preset.clone(),
        "-b:v".to_string(),
        format!("{}k", video.bitrate_kbps),
        "-maxrate".to_string(),
        format!("{}k", video.max_bitrate_kbps),
        "-bufsize".to_string(),
        format!("{}k", video.buffer_kbits),
        "-pix_fmt".to_string(),
        video.pixel_format.clone(),
        "-g".to_string(),
        video.keyframe_interval_frames.to_string(),
    ]);

    // 5. Audio
    args.extend([
        "-c:a".to_string(),
        audio.codec.clone(),
        "-b:a".to_string(),
        format!("{}k", audio.bitrate_kbps),
        "-ar".to_string(),
        audio.sample_rate.to_string(),
    ]);

    // 6. Output
    args.extend([
        "-f".to_string(),
        profile.output_format.clone(),
        destination.to_string(),
    ]);

    args
}

/// Launches ffmpeg pushing to a fixed destination.
#[derive(Clone)]
pub struct FfmpegLauncher {
    binary: PathBuf,
    profile: EncoderProfile,
    destination: String,
    redactor: Redactor,
}

impl FfmpegLauncher {
    /// Create a launcher. `destination` is the full ingest URL and is
    /// never logged.
    pub fn new(binary: impl Into<PathBuf>, profile: EncoderProfile, destination: String) -> Self {
        Self {
            binary: binary.into(),
            profile,
            destination,
            redactor: Redactor::none(),
        }
    }

    /// Mask `secret` in everything read from the encoder's stderr.
    pub fn redacting(mut self, secret: impl Into<String>) -> Self {
        self.redactor = Redactor::new([secret.into()]);
        self
    }

    fn command(&self, source: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(build_args(&self.profile, source, &self.destination))
            .env("LC_ALL", "C");
        cmd
    }
}

impl fmt::Debug for FfmpegLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegLauncher")
            .field("binary", &self.binary)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl EncoderLauncher for FfmpegLauncher {
    #[instrument(name = "launch_encoder", skip(self))]
    fn launch(&self, source: &str) -> EncoderResult<Box<dyn EncoderChild>> {
        debug!(binary = %self.binary.display(), "Spawning encoder");
        let process = EncoderProcess::spawn(self.command(source), self.redactor.clone())?;
        info!(pid = process.id(), "Encoder running");
        Ok(Box::new(process))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
