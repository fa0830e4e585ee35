//! Connectivity probe and source verification.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportError;
use crate::TransportResult;

/// Host probed to decide whether the machine is online.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// Checks general internet reachability.
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the probe got any response within its timeout.
    fn check(&self) -> bool;
}

/// Checks that a source exists before an encoder is launched for it.
pub trait SourceVerifier: Send + Sync {
    /// Returns true if the source looks playable.
    fn verify(&self, locator: &str) -> bool;
}

/// Blocking HTTP implementation of both checks.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    probe_url: Url,
}

impl HttpProbe {
    /// Create a probe against `probe_url` with the given request timeout.
    pub fn new(probe_url: &str, timeout: Duration) -> TransportResult<Self> {
        let probe_url = Url::parse(probe_url)
            .map_err(|e| TransportError::InvalidProbeUrl(format!("{probe_url}: {e}")))?;
        if !matches!(probe_url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidProbeUrl(
                "probe URL must be http or https".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("playout/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, probe_url })
    }

    fn head_ok(&self, url: Url) -> bool {
        match self.client.head(url).send() {
            Ok(response) => {
                let status = response.status();
                debug!(%status, "Source HEAD response");
                status == StatusCode::OK
            }
            Err(e) => {
                debug!("Source HEAD failed: {}", e);
                false
            }
        }
    }
}

impl ConnectivityProbe for HttpProbe {
    #[instrument(name = "connectivity_probe", skip(self), fields(url = %self.probe_url))]
    fn check(&self) -> bool {
        match self.client.get(self.probe_url.clone()).send() {
            Ok(response) => {
                debug!(status = %response.status(), "Probe answered");
                true
            }
            Err(e) => {
                debug!("Probe failed: {}", e);
                false
            }
        }
    }
}

impl SourceVerifier for HttpProbe {
    #[instrument(name = "verify_source", skip(self))]
    fn verify(&self, locator: &str) -> bool {
        match Url::parse(locator) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.head_ok(url),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(|path| path.is_file())
                .unwrap_or(false),
            Ok(url) if url.scheme().len() > 1 => {
                // Other protocols (rtmp, srt, ...) are left to the encoder.
                debug!(scheme = url.scheme(), "No check available for scheme");
                true
            }
            // Plain paths, including Windows drive letters parsed as a scheme.
            _ => Path::new(locator).is_file(),
        }
    }
}
