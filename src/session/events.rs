use crate::audio::CaptureMode;

/// Everything the pipeline tells the outside world.
///
/// Collaborators (UI, notification surfaces) subscribe to one unbounded
/// channel of these; the pipeline never blocks on a slow consumer.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Capture started in the given mode.
    Started(CaptureMode),
    /// Raw captured PCM, for consumers that tap the audio stream.
    AudioData(Vec<u8>),
    /// A pipeline error, already classified and rendered.
    Error(String),
    /// Capture stopped.
    Stopped,
    /// System capture failed at start; the pipeline fell back to the
    /// microphone.
    ModeFallback(CaptureMode),
    /// The accumulated live transcript changed.
    TranscriptionUpdate(String),
    /// One finalized utterance.
    TranscriptionComplete(String),
    /// Incremental chat-completion output.
    AiResponseUpdate(String),
    /// The full chat-completion answer.
    AiResponse(String),
    /// The ASR session finished its handshake.
    SessionReady,
    /// A classified (and throttled) ASR session error.
    SessionError(String),
    /// The ASR session closed.
    SessionClosed,
}
