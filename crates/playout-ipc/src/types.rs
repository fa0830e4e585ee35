//! Common types shared by the supervisor and its host.

use std::time::Duration;

/// Sources streamed when no playlist is configured.
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://hanuman.s3.us-south.cloud-object-storage.appdomain.cloud/0000.mp4",
    "https://hanuman.s3.us-south.cloud-object-storage.appdomain.cloud/0001.mp4",
    "https://hanuman.s3.us-south.cloud-object-storage.appdomain.cloud/0002.mp4",
];

/// An ordered, non-empty list of source locators (URLs or local paths).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    sources: Vec<String>,
}

impl Playlist {
    /// Build a playlist, dropping blank entries.
    ///
    /// Returns `None` if nothing is left.
    pub fn new<I, S>(sources: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources: Vec<String> = sources
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if sources.is_empty() {
            None
        } else {
            Some(Self { sources })
        }
    }

    /// The built-in playlist.
    pub fn builtin() -> Self {
        Self {
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sources in playback order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the playlist has no sources.
    ///
    /// A playlist is non-empty by construction, so this is always false.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Fixed delays used by the playlist loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait after a failed connectivity probe.
    pub offline_retry: Duration,

    /// Wait after an encoder failure before moving to the next source.
    pub failure_backoff: Duration,

    /// Wait after a successful item before starting the next one.
    pub item_gap: Duration,

    /// Time an encoder gets to exit after a polite termination request.
    pub kill_grace: Duration,

    /// Timeout for the connectivity probe and source verification.
    pub probe_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            offline_retry: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(10),
            item_gap: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of the supervisor's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    /// Encoder launches attempted.
    pub attempts: u64,

    /// Encoder runs that exited successfully.
    pub successes: u64,

    /// Encoder runs that failed to launch or exited with an error.
    pub failures: u64,

    /// Sources skipped because verification failed.
    pub skipped: u64,

    /// Failed connectivity probes.
    pub offline_checks: u64,

    /// Completed playlist passes.
    pub passes: u64,

    /// Consecutive passes in which no source streamed successfully.
    pub failed_passes_in_a_row: u64,

    /// Time since the loop started.
    pub uptime_seconds: u64,
}
