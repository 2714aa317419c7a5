//! Live conversation capture: a microphone feeds a low-latency streaming
//! transcription path and a high-accuracy batch diarization path in
//! parallel; the session controller reconciles both into a single
//! speaker-attributed transcript.

pub mod audio_toolkit;
pub mod batch_recorder;
pub mod diarization;
pub mod error;
pub mod session;
pub mod settings;
pub mod streaming;
pub mod transcript;

pub use error::SessionError;
pub use session::{ConnectionStatus, SessionController, SessionEvent, SessionOutcome};
pub use settings::Settings;
pub use transcript::{TranscriptItem, TranscriptSource, TranscriptView};
