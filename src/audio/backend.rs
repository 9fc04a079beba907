use anyhow::Result;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Which audio the capture session targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// System audio output (applications, browser, etc.)
    System,
    /// Microphone input
    Microphone,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::System => write!(f, "system"),
            CaptureMode::Microphone => write!(f, "microphone"),
        }
    }
}

/// One 100 ms slice of mono 16-bit PCM, produced by a capture source and
/// consumed exactly once by the ASR session.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Little-endian 16-bit PCM bytes
    pub pcm: Vec<u8>,
    /// Sample rate of the contained samples
    pub sample_rate: u32,
    /// When the chunk was produced
    pub captured_at: Instant,
}

/// Configuration for a capture source.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate; the pipeline supports 16000 and 8000 Hz
    pub target_sample_rate: u32,
    /// Command that dumps interleaved stereo s16le system audio to stdout
    pub subprocess_command: Option<String>,
    /// Preferred microphone device name (None = default input)
    pub mic_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            subprocess_command: None,
            mic_device: None,
        }
    }
}

/// How a running source terminated, reported back to the Coordinator so
/// it can distinguish crashes from deliberate stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    /// Stopped on request or the stream ended cleanly.
    Clean,
    /// Subprocess exited non-zero or was killed.
    Crashed,
}

/// A running capture source.
///
/// Exactly one is live at a time. The source never blocks on the chunk
/// consumer; chunks the consumer cannot take immediately are dropped.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Stop capturing and release the device/process.
    async fn stop(&mut self) -> Result<()>;

    /// Source name for logging.
    fn name(&self) -> &str;

    /// Await source termination, returning how it ended. Used by the
    /// Coordinator's supervision loop.
    async fn wait_exit(&mut self) -> SourceExit;
}

/// The selected source variant plus its chunk stream.
pub struct ActiveSource {
    pub source: Box<dyn CaptureSource>,
    pub chunks: mpsc::Receiver<AudioChunk>,
}

/// Probe and start a capture source for `mode`.
///
/// System mode tries the native subprocess dump first and falls back to
/// the platform capture API; microphone mode goes straight to the
/// platform API. Probing selects exactly one variant; failures surface
/// to the Coordinator, which owns the mode-fallback policy.
pub async fn probe_source(mode: CaptureMode, config: &CaptureConfig) -> Result<ActiveSource> {
    match mode {
        CaptureMode::System => {
            if let Some(cmd) = &config.subprocess_command {
                match super::subprocess::SubprocessSource::spawn(cmd, config.target_sample_rate) {
                    Ok((source, chunks)) => {
                        info!("system audio via subprocess source");
                        return Ok(ActiveSource {
                            source: Box::new(source),
                            chunks,
                        });
                    }
                    Err(e) => {
                        warn!("subprocess source unavailable: {:#}", e);
                    }
                }
            }
            let (source, chunks) = super::mic::MicSource::start_loopback(config.target_sample_rate)?;
            info!("system audio via platform capture API");
            Ok(ActiveSource {
                source: Box::new(source),
                chunks,
            })
        }
        CaptureMode::Microphone => {
            let (source, chunks) =
                super::mic::MicSource::start(config.mic_device.as_deref(), config.target_sample_rate)?;
            info!("microphone capture via platform API");
            Ok(ActiveSource {
                source: Box::new(source),
                chunks,
            })
        }
    }
}
