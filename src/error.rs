use thiserror::Error;

/// Failure classes for a capture session.
///
/// Permission and connection failures are absorbed by lifecycle state
/// transitions rather than bubbling up as generic errors; transcription and
/// upload failures degrade the session without aborting it.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access denied or no usable input device. Fatal to starting
    /// a session; requires an explicit user retry.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Streaming transport failed to open or dropped unexpectedly. Committed
    /// transcript items are preserved; only the live view degrades.
    #[error("streaming connection failed: {0}")]
    Connection(String),

    /// Service-reported error on an otherwise healthy connection.
    #[error("transcription service error: {0}")]
    Transcription(String),

    /// Batch diarization upload failed; the streaming transcript stands.
    #[error("diarization upload failed: {0}")]
    Upload(String),
}
