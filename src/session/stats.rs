use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asr::AsrSessionState;
use crate::audio::CaptureMode;

/// Point-in-time snapshot of the pipeline, suitable for a status line
/// or a JSON dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Whether audio capture is currently active
    pub capturing: bool,

    /// Active capture mode, if any
    pub mode: Option<CaptureMode>,

    /// Transcription session state
    pub session_state: AsrSessionState,

    /// When the pipeline started
    pub started_at: DateTime<Utc>,

    /// Seconds since the pipeline started
    pub uptime_secs: f64,

    /// Audio chunks forwarded to the transcription session
    pub chunks_sent: u64,

    /// Audio chunks dropped while the session was not ready
    pub chunks_dropped: u64,

    /// Finalized utterances produced by the merge engine
    pub utterances: u64,

    /// Reconnect attempts across capture and transcription
    pub reconnects: u64,
}
