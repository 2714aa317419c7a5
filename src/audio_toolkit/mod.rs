pub mod capture;
pub mod pcm;
pub mod resampler;

pub use capture::{
    list_input_devices, AudioCapture, CaptureHandle, ChunkMessage, EncodedChunk, FRAME_SAMPLES,
};
pub use resampler::FrameResampler;
