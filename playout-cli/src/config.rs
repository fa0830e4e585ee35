//! Command-line, environment and file configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file given with
//! `--config`, environment variables, command-line flags. Environment
//! variables and flags are resolved together by clap.
//!
//! The stream key is the exception: it is read from `PLAYOUT_STREAM_KEY`
//! only, so it never shows up in process listings or shell history.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use playout_encoder::{ReconnectPolicy, DEFAULT_FFMPEG_BINARY};
use playout_ipc::{Playlist, Timings};
use playout_transport::{DEFAULT_INGEST_TEMPLATE, DEFAULT_PROBE_URL};

/// Environment variable holding the stream key.
pub const STREAM_KEY_ENV: &str = "PLAYOUT_STREAM_KEY";

/// Log file used when none is configured.
pub const DEFAULT_LOG_FILE: &str = "stream_log.txt";

/// Command-line arguments.
#[derive(Parser)]
#[command(
    name = "playout",
    version,
    about = "Loop a playlist of videos to an RTMP ingest endpoint, forever"
)]
pub struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "PLAYOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ingest URL template; `{key}` is replaced by the stream key.
    #[arg(long, env = "PLAYOUT_INGEST_URL")]
    pub ingest_url: Option<String>,

    /// Source to stream (repeatable). Replaces the configured playlist.
    #[arg(short = 's', long = "source", value_name = "URL_OR_PATH")]
    pub sources: Vec<String>,

    /// Encoder binary.
    #[arg(long, env = "PLAYOUT_FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// Log file path.
    #[arg(long, env = "PLAYOUT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Do not check sources before streaming them.
    #[arg(long)]
    pub no_verify: bool,

    /// Do not pass input reconnect options to the encoder.
    #[arg(long)]
    pub no_reconnect: bool,
}

/// Contents of the optional TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ingest_url: Option<String>,
    pub sources: Option<Vec<String>>,
    pub ffmpeg: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub probe_url: Option<String>,
    pub verify_sources: Option<bool>,
    pub reconnect: Option<bool>,
    pub reconnect_delay_max_secs: Option<u64>,
    pub offline_retry_secs: Option<u64>,
    pub failure_backoff_secs: Option<u64>,
    pub item_gap_secs: Option<u64>,
    pub kill_grace_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Fully resolved application configuration.
pub struct AppConfig {
    stream_key: String,
    pub ingest_template: String,
    pub playlist: Playlist,
    pub ffmpeg: PathBuf,
    pub log_file: PathBuf,
    pub probe_url: String,
    pub verify_sources: bool,
    pub reconnect: ReconnectPolicy,
    pub timings: Timings,
}

impl AppConfig {
    /// Resolve configuration from parsed arguments and the environment,
    /// reading `--config` if given.
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file, env::var(STREAM_KEY_ENV).ok())
    }

    /// Merge arguments over file settings over defaults.
    pub fn resolve(args: Args, file: FileConfig, stream_key: Option<String>) -> Result<Self> {
        let stream_key = match stream_key.map(|k| k.trim().to_string()) {
            Some(key) if !key.is_empty() => key,
            _ => bail!("no stream key configured; set {STREAM_KEY_ENV}"),
        };

        let playlist = if !args.sources.is_empty() {
            Playlist::new(args.sources)
        } else if let Some(sources) = file.sources {
            Playlist::new(sources)
        } else {
            Some(Playlist::builtin())
        };
        let Some(playlist) = playlist else {
            bail!("the playlist is empty");
        };

        let defaults = Timings::default();
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        let timings = Timings {
            offline_retry: secs(file.offline_retry_secs, defaults.offline_retry),
            failure_backoff: secs(file.failure_backoff_secs, defaults.failure_backoff),
            item_gap: secs(file.item_gap_secs, defaults.item_gap),
            kill_grace: secs(file.kill_grace_secs, defaults.kill_grace),
            probe_timeout: secs(file.probe_timeout_secs, defaults.probe_timeout),
        };
        if timings.probe_timeout.is_zero() {
            bail!("probe_timeout_secs must be greater than zero");
        }

        let reconnect_defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            enabled: !args.no_reconnect && file.reconnect.unwrap_or(reconnect_defaults.enabled),
            max_delay: secs(file.reconnect_delay_max_secs, reconnect_defaults.max_delay),
        };

        Ok(Self {
            stream_key,
            ingest_template: args
                .ingest_url
                .or(file.ingest_url)
                .unwrap_or_else(|| DEFAULT_INGEST_TEMPLATE.to_string()),
            playlist,
            ffmpeg: args
                .ffmpeg
                .or(file.ffmpeg)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_BINARY)),
            log_file: args
                .log_file
                .or(file.log_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            probe_url: file
                .probe_url
                .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string()),
            verify_sources: !args.no_verify && file.verify_sources.unwrap_or(true),
            reconnect,
            timings,
        })
    }

    /// The stream key. Never log this.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("stream_key", &"****")
            .field("ingest_template", &self.ingest_template)
            .field("playlist", &self.playlist.sources())
            .field("ffmpeg", &self.ffmpeg)
            .field("log_file", &self.log_file)
            .field("probe_url", &self.probe_url)
            .field("verify_sources", &self.verify_sources)
            .field("reconnect", &self.reconnect)
            .field("timings", &self.timings)
            .finish()
    }
}
