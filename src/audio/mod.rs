pub mod backend;
pub mod chunker;
pub mod mic;
pub mod subprocess;

pub use backend::{
    probe_source, ActiveSource, AudioChunk, CaptureConfig, CaptureMode, CaptureSource, SourceExit,
};
pub use chunker::{
    downmix_stereo_bytes, f32_to_i16, samples_to_le_bytes, FrameAligner, LinearResampler,
    SampleChunker,
};
