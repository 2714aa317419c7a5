//! Runtime configuration.

use crate::audio_toolkit::pcm::SAMPLE_RATE;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_streaming_url() -> String {
    "ws://127.0.0.1:8765/stream".to_string()
}

fn default_diarization_url() -> String {
    "http://127.0.0.1:8766/diarize".to_string()
}

fn default_chunk_interval_ms() -> u64 {
    1000
}

fn default_participants() -> Vec<String> {
    vec!["Speaker 1".to_string(), "Speaker 2".to_string()]
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_streaming_url")]
    pub streaming_url: String,
    #[serde(default = "default_diarization_url")]
    pub diarization_url: String,
    /// Bearer token for the diarization endpoint. Overridden by
    /// `COLLOQUY_API_KEY` when set.
    #[serde(default)]
    pub api_key: String,
    /// Input device name; `None` uses the system default.
    #[serde(default)]
    pub input_device: Option<String>,
    /// Interval at which encoded chunks are cut for the batch recorder.
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
    /// Role labels mapped onto diarization speaker indices, in order.
    #[serde(default = "default_participants")]
    pub participants: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            streaming_url: default_streaming_url(),
            diarization_url: default_diarization_url(),
            api_key: String::new(),
            input_device: None,
            chunk_interval_ms: default_chunk_interval_ms(),
            participants: default_participants(),
        }
    }
}

impl Settings {
    /// Load from a JSON file, or fall back to defaults when no path is
    /// given. The API key env var wins over the file in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read settings file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid settings file {}", path.display()))?
            }
            None => Settings::default(),
        };

        ensure!(
            settings.chunk_interval_ms > 0,
            "chunk_interval_ms must be greater than zero"
        );

        if let Ok(key) = std::env::var("COLLOQUY_API_KEY") {
            if !key.is_empty() {
                settings.api_key = key;
            }
        }

        Ok(settings)
    }

    /// Samples per encoded chunk at the pipeline sample rate.
    pub fn chunk_samples(&self) -> usize {
        ((SAMPLE_RATE as u64 * self.chunk_interval_ms) / 1000) as usize
    }

    /// Label used when the streaming service omits the speaker.
    pub fn default_speaker_label(&self) -> String {
        self.participants
            .first()
            .cloned()
            .unwrap_or_else(|| "Speaker 1".to_string())
    }
}
