//! Streaming speech recognition: wire frame codec, WebSocket session,
//! and the partial-transcript merge engine.

pub mod frame;
pub mod merge;
pub mod session;

pub use frame::{decode, encode, AsrFrame, Decoded, FrameFlags, MessageType, Serialization, WireCompression};
pub use merge::{merge, similarity, MergeOutcome, TranscriptionEvent, UtteranceBuffer};
pub use session::{run_session, AsrConfig, AsrEvent, AsrSessionState, SessionContext, StateCell};
