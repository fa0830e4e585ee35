//! RTMP ingest destination.

use std::fmt;

use url::Url;

use crate::error::TransportError;
use crate::TransportResult;

/// Placeholder replaced by the stream key in an ingest URL template.
pub const STREAM_KEY_PLACEHOLDER: &str = "{key}";

/// Ingest template used when none is configured.
pub const DEFAULT_INGEST_TEMPLATE: &str = "rtmp://a.rtmp.youtube.com/live2/{key}";

const REDACTED: &str = "****";

/// The destination the encoder pushes to.
///
/// The stream key is a credential: `Display` and `Debug` both print the
/// redacted form, and the full URL is only reachable through
/// [`IngestEndpoint::expose_url`].
#[derive(Clone)]
pub struct IngestEndpoint {
    template: String,
    stream_key: String,
    host: String,
}

impl IngestEndpoint {
    /// Build an endpoint from a template such as
    /// `rtmp://a.rtmp.youtube.com/live2/{key}`.
    pub fn new(template: &str, stream_key: &str) -> TransportResult<Self> {
        let template = template.trim();
        let stream_key = stream_key.trim();

        if !template.starts_with("rtmp://") && !template.starts_with("rtmps://") {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp:// or rtmps://".to_string(),
            ));
        }

        if !template.contains(STREAM_KEY_PLACEHOLDER) {
            return Err(TransportError::MissingPlaceholder(STREAM_KEY_PLACEHOLDER));
        }

        if stream_key.is_empty() {
            return Err(TransportError::EmptyStreamKey);
        }

        // Validate the shape without ever putting the key in an error message.
        let parsed = Url::parse(&template.replace(STREAM_KEY_PLACEHOLDER, REDACTED))
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl("URL has no host".to_string()))?
            .to_string();

        Ok(Self {
            template: template.to_string(),
            stream_key: stream_key.to_string(),
            host,
        })
    }

    /// The full destination URL including the stream key.
    ///
    /// Only the encoder invocation should ever see this value.
    pub fn expose_url(&self) -> String {
        self.template
            .replace(STREAM_KEY_PLACEHOLDER, &self.stream_key)
    }

    /// The destination URL with the stream key masked.
    pub fn redacted(&self) -> String {
        self.template.replace(STREAM_KEY_PLACEHOLDER, REDACTED)
    }

    /// Ingest host name.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for IngestEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for IngestEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestEndpoint")
            .field("url", &self.redacted())
            .finish()
    }
}
