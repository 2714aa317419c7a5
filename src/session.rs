//! Session lifecycle controller.
//!
//! One controller instance drives exactly one session: it starts the
//! streaming connection and microphone together, pumps PCM frames out and
//! transcript events in on a single cooperative task (the transcript has one
//! writer, so no locking), and runs the strict end-of-session teardown that
//! reconciles the live transcript with the batch diarization result.
//!
//! `Disconnected` is terminal; a new session needs a fresh controller.

use crate::audio_toolkit::{pcm, AudioCapture, CaptureHandle};
use crate::batch_recorder::BatchRecorder;
use crate::diarization::{label_utterances, DiarizationClient, Utterance};
use crate::error::SessionError;
use crate::settings::Settings;
use crate::streaming::{StreamEvent, StreamingClient};
use crate::transcript::{TranscriptItem, TranscriptReconciler, TranscriptSource, TranscriptView};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

// Frame tap depth: ~2 s of 64 ms frames before the live path drops.
const FRAME_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        status: ConnectionStatus,
        is_recording: bool,
    },
    TranscriptUpdated(TranscriptView),
    /// A failure the session survives (service error, failed upload).
    RecoverableError(String),
}

/// Final hand-off to the analysis consumer.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Ordered `"<role>: <text>"` lines.
    pub lines: Vec<String>,
    pub source: TranscriptSource,
}

pub struct SessionController {
    settings: Settings,
    status: ConnectionStatus,
    is_recording: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    reconciler: TranscriptReconciler,
}

impl SessionController {
    pub fn new(settings: Settings, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            settings,
            status: ConnectionStatus::Idle,
            is_recording: false,
            events,
            reconciler: TranscriptReconciler::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Run the session until `end` fires, then perform the full teardown
    /// sequence and hand off the best available transcript.
    pub async fn run(
        mut self,
        mut end: oneshot::Receiver<()>,
    ) -> Result<SessionOutcome, SessionError> {
        self.transition(ConnectionStatus::Connecting, false);

        // Streaming connection first, then the microphone.
        let (mut client, mut stream_events) =
            match StreamingClient::connect(&self.settings.streaming_url).await {
                Ok(pair) => pair,
                Err(e) => {
                    self.transition(ConnectionStatus::Disconnected, false);
                    return Err(e);
                }
            };

        let (frame_tx, mut frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let capture = match AudioCapture::start(
            self.settings.input_device.clone(),
            frame_tx,
            chunk_tx,
            self.settings.chunk_samples(),
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // Microphone failed after the socket opened: close it so no
                // orphaned connection survives the failed start.
                client.close().await;
                self.transition(ConnectionStatus::Disconnected, false);
                return Err(e);
            }
        };
        let mut recorder = BatchRecorder::new(chunk_rx);

        self.transition(ConnectionStatus::Connected, true);
        info!("session started");

        let mut frames_done = false;
        let mut stream_done = false;
        loop {
            tokio::select! {
                _ = &mut end => {
                    info!("end of session requested");
                    break;
                }
                frame = frame_rx.recv(), if !frames_done => {
                    match frame {
                        Some(frame) => client.send(pcm::samples_to_pcm16(&frame)).await,
                        None => frames_done = true,
                    }
                }
                event = stream_events.recv(), if !stream_done => {
                    match event {
                        Some(event) => {
                            if self.handle_stream_event(event) {
                                stream_done = true;
                                client.mark_closed();
                            }
                        }
                        None => stream_done = true,
                    }
                }
            }
        }

        self.finish(client, capture, recorder).await
    }

    /// End-of-session sequence, each step awaited in order: close the
    /// stream, flush the recorder, diarize, reconcile, release the
    /// microphone, hand off.
    async fn finish(
        mut self,
        mut client: StreamingClient,
        capture: CaptureHandle,
        mut recorder: BatchRecorder,
    ) -> Result<SessionOutcome, SessionError> {
        client.close().await;
        self.reconciler.clear_interim();
        self.transition(ConnectionStatus::Disconnected, false);

        capture.halt();
        recorder.stop().await;

        if recorder.is_empty() {
            debug!("no audio captured; skipping diarization upload");
        } else {
            match pcm::pcm16_to_wav(&recorder.assemble()) {
                Ok(wav) => {
                    info!(
                        "uploading {} chunks ({} bytes) for diarization",
                        recorder.chunk_count(),
                        wav.len()
                    );
                    let diarizer = DiarizationClient::new(
                        self.settings.diarization_url.clone(),
                        self.settings.api_key.clone(),
                    );
                    let result = diarizer.upload(wav).await;
                    self.reconcile_batch(result);
                }
                Err(e) => {
                    warn!("failed to assemble session audio: {e}; keeping streaming transcript");
                    self.emit(SessionEvent::RecoverableError(e.to_string()));
                }
            }
        }

        capture.release().await;

        Ok(SessionOutcome {
            lines: self.reconciler.handoff_lines(),
            source: self.reconciler.source(),
        })
    }

    /// Apply one inbound streaming event. Returns true when the event was
    /// terminal (connection closed).
    fn handle_stream_event(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Transcript {
                text,
                speaker,
                is_final,
            } => {
                let speaker = speaker.unwrap_or_else(|| self.settings.default_speaker_label());
                if is_final {
                    self.reconciler.append_final(TranscriptItem::new(speaker, text));
                } else {
                    self.reconciler.set_interim(TranscriptItem::new(speaker, text));
                }
                self.emit(SessionEvent::TranscriptUpdated(self.reconciler.snapshot()));
                false
            }
            StreamEvent::ServiceError { message } => {
                let err = SessionError::Transcription(message);
                warn!("{err}");
                self.emit(SessionEvent::RecoverableError(err.to_string()));
                false
            }
            StreamEvent::Closed => {
                // Committed items survive; only the tentative line goes.
                self.reconciler.clear_interim();
                self.transition(ConnectionStatus::Disconnected, false);
                self.emit(SessionEvent::TranscriptUpdated(self.reconciler.snapshot()));
                true
            }
        }
    }

    /// Accept the diarized result, or keep the streaming transcript when
    /// the batch pipeline failed. No error escapes this point.
    fn reconcile_batch(&mut self, result: Result<Vec<Utterance>, SessionError>) {
        match result {
            Ok(utterances) => {
                info!("diarized transcript accepted ({} utterances)", utterances.len());
                let items = label_utterances(&utterances, &self.settings.participants);
                self.reconciler.replace_all(items);
                self.emit(SessionEvent::TranscriptUpdated(self.reconciler.snapshot()));
            }
            Err(e) => {
                warn!("{e}; keeping streaming transcript");
                self.emit(SessionEvent::RecoverableError(e.to_string()));
            }
        }
    }

    fn transition(&mut self, status: ConnectionStatus, is_recording: bool) {
        if self.status == status && self.is_recording == is_recording {
            return;
        }
        debug!(
            "session state {:?} -> {:?} (recording: {})",
            self.status, status, is_recording
        );
        self.status = status;
        self.is_recording = is_recording;
        self.emit(SessionEvent::StateChanged {
            status,
            is_recording,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // The presentation layer may be gone during teardown; that's fine.
        let _ = self.events.send(event);
    }
}
