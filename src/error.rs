// Pipeline error taxonomy
//
// Leaf components never raise across the pipeline boundary; they emit
// typed error events built from this taxonomy. The Resilience Manager is
// the only place that decides retry-vs-fatal, and it does so by calling
// `is_retryable()`.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum length of a passthrough message from an unclassifiable
/// transport error.
const UNCLASSIFIED_TRUNCATE: usize = 200;

/// Classified pipeline errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Capture permission was denied; requires user remediation.
    #[error("permission denied for {0} capture")]
    PermissionDenied(String),

    /// Required configuration is missing or invalid.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// Transient network failure; retryable with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Provider quota exhausted; retryable, possibly after credential
    /// rotation.
    #[error("provider quota exceeded")]
    ProviderQuotaExceeded,

    /// Decoded ErrorResponse frame from the ASR provider.
    #[error("ASR protocol error (code {0})")]
    ProtocolError(u32),

    /// Provider does not serve this region; fatal for the process
    /// lifetime.
    #[error("provider unavailable in this region")]
    RegionUnsupported,

    /// Capture subprocess crashed; retryable with capped attempts.
    #[error("capture process exited unexpectedly")]
    ProcessCrash,

    /// Last-resort passthrough for transport errors that could not be
    /// classified. Message is truncated.
    #[error("{0}")]
    Unclassified(String),
}

impl PipelineError {
    /// Whether the Resilience Manager may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::TransientNetwork(_)
            | PipelineError::ProviderQuotaExceeded
            | PipelineError::ProtocolError(_)
            | PipelineError::ProcessCrash => true,
            PipelineError::PermissionDenied(_)
            | PipelineError::ConfigMissing(_)
            | PipelineError::RegionUnsupported
            | PipelineError::Unclassified(_) => false,
        }
    }

    /// Wrap a raw transport error string, truncated to a bounded length.
    pub fn unclassified(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let msg = if raw.chars().count() > UNCLASSIFIED_TRUNCATE {
            raw.chars().take(UNCLASSIFIED_TRUNCATE).collect()
        } else {
            raw.to_string()
        };
        PipelineError::Unclassified(msg)
    }
}

/// Map a 4-byte ASR error code to the taxonomy.
///
/// Quota and region codes get their own classes so the retry policy can
/// differ; everything else is a protocol error torn down per the
/// Resilience Manager policy.
pub fn classify_asr_error(code: u32) -> PipelineError {
    match code {
        45000002 => PipelineError::ProviderQuotaExceeded,
        45000300..=45000309 => PipelineError::RegionUnsupported,
        _ => PipelineError::ProtocolError(code),
    }
}

/// Rate limiter for identical error messages.
///
/// Repeated failures during an outage would otherwise storm the event
/// channel; identical messages are suppressed within the window.
pub struct ErrorThrottle {
    window: Duration,
    last_emitted: HashMap<String, Instant>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Default 30 second window.
    pub fn default_window() -> Self {
        Self::new(Duration::from_secs(30))
    }

    /// Returns true if this message should be emitted now, and records
    /// the emission. Identical messages within the window return false.
    pub fn should_emit(&mut self, message: &str, now: Instant) -> bool {
        // Drop stale entries so the map stays bounded during long runs.
        self.last_emitted
            .retain(|_, at| now.duration_since(*at) < self.window);

        match self.last_emitted.get(message) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                self.last_emitted.insert(message.to_string(), now);
                true
            }
        }
    }
}
