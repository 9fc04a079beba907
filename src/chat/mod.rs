//! Finalized utterances in, streamed chat-completion answers out.

pub mod history;
pub mod relay;

pub use history::{ChatHistory, ChatTurn, Role};
pub use relay::{CompletionConfig, CompletionRelay, RelayEvent, SseLineBuffer};
