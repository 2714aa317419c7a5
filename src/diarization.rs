//! Batch diarization upload client.
//!
//! One-shot multipart upload of the assembled session audio; the response
//! attributes each utterance to a small integer speaker index. Transient
//! failures are retried with exponential backoff; the final failure is still
//! non-fatal to the session (the streaming transcript stands).

use crate::error::SessionError;
use crate::transcript::TranscriptItem;
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 5000;

/// One diarized segment of speech attributed to a single speaker index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Utterance {
    pub speaker: usize,
    pub transcript: String,
}

#[derive(Deserialize)]
struct DiarizationResponse {
    utterances: Vec<Utterance>,
}

/// Map a diarization speaker index to a role label. Indices beyond the
/// configured roles get a synthesized label rather than being dropped.
pub fn speaker_role(index: usize, roles: &[String]) -> String {
    roles
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("Speaker {}", index + 1))
}

/// Turn the diarization result into committed transcript items, in order.
pub fn label_utterances(utterances: &[Utterance], roles: &[String]) -> Vec<TranscriptItem> {
    utterances
        .iter()
        .map(|u| TranscriptItem::new(speaker_role(u.speaker, roles), u.transcript.clone()))
        .collect()
}

pub struct DiarizationClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl DiarizationClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn upload_impl(&self, wav: &[u8]) -> Result<Vec<Utterance>, SessionError> {
        let part = multipart::Part::bytes(wav.to_vec())
            .file_name("session.wav")
            .mime_str("audio/wav")
            .map_err(|e| SessionError::Upload(e.to_string()))?;
        let form = multipart::Form::new().part("audio", part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if !self.api_key.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Upload(format!(
                "diarization service returned {status}: {body}"
            )));
        }

        let parsed: DiarizationResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Upload(format!("unparseable response: {e}")))?;
        debug!("diarization returned {} utterances", parsed.utterances.len());
        Ok(parsed.utterances)
    }

    /// Upload the assembled WAV with retry and exponential backoff.
    pub async fn upload(&self, wav: Vec<u8>) -> Result<Vec<Utterance>, SessionError> {
        let mut delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 0..MAX_RETRIES {
            match self.upload_impl(&wav).await {
                Ok(utterances) => return Ok(utterances),
                Err(e) if attempt < MAX_RETRIES - 1 => {
                    warn!(
                        "diarization upload attempt {} failed: {e}, retrying in {delay:?}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_millis(MAX_RETRY_DELAY_MS));
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> Vec<String> {
        vec!["Speaker 1".to_string(), "Speaker 2".to_string()]
    }

    #[test]
    fn response_json_parses_utterances_in_order() {
        let raw = r#"{"utterances":[{"speaker":0,"transcript":"Hi"},{"speaker":1,"transcript":"Bye"}]}"#;
        let parsed: DiarizationResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.utterances,
            vec![
                Utterance {
                    speaker: 0,
                    transcript: "Hi".into()
                },
                Utterance {
                    speaker: 1,
                    transcript: "Bye".into()
                },
            ]
        );
    }

    #[test]
    fn speaker_indices_map_to_configured_roles() {
        assert_eq!(speaker_role(0, &roles()), "Speaker 1");
        assert_eq!(speaker_role(1, &roles()), "Speaker 2");
    }

    #[test]
    fn out_of_range_index_gets_synthesized_label() {
        assert_eq!(speaker_role(2, &roles()), "Speaker 3");
        assert_eq!(speaker_role(0, &[]), "Speaker 1");
    }

    #[test]
    fn labeling_preserves_utterance_order() {
        let utterances = vec![
            Utterance {
                speaker: 0,
                transcript: "Hi".into(),
            },
            Utterance {
                speaker: 1,
                transcript: "Bye".into(),
            },
        ];
        let items = label_utterances(&utterances, &roles());
        assert_eq!(
            items,
            vec![
                TranscriptItem::new("Speaker 1", "Hi"),
                TranscriptItem::new("Speaker 2", "Bye"),
            ]
        );
    }
}
