//! Pipeline assembly
//!
//! This module ties the pieces together:
//! - Capture coordination (permissions, fallback, mode switching)
//! - The ASR session driver with reconnect backoff
//! - The chat-completion relay worker
//! - Pipeline events and status snapshots

mod coordinator;
mod events;
mod pipeline;
mod stats;

pub use coordinator::{
    AllowAll, CaptureCoordinator, CaptureSession, CoordinatorState, PermissionGate,
};
pub use events::PipelineEvent;
pub use pipeline::VoicePipeline;
pub use stats::PipelineStatus;
