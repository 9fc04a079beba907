pub mod asr;
pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod metrics;
pub mod resilience;
pub mod session;

pub use audio::{AudioChunk, CaptureConfig, CaptureMode};
pub use config::Config;
pub use error::PipelineError;
pub use session::{PipelineEvent, PipelineStatus, VoicePipeline};
