//! Session-long accumulation of encoded audio chunks.
//!
//! The recorder consumes the capture engine's chunk tap for the whole
//! session, independent of streaming connection state. `stop` resolves only
//! after the capture-side flush marker, so the caller can assemble the
//! complete ordered sequence before uploading.

use crate::audio_toolkit::{ChunkMessage, EncodedChunk};
use log::debug;
use tokio::sync::mpsc;

pub struct BatchRecorder {
    rx: mpsc::UnboundedReceiver<ChunkMessage>,
    chunks: Vec<EncodedChunk>,
    flushed: bool,
}

impl BatchRecorder {
    pub fn new(rx: mpsc::UnboundedReceiver<ChunkMessage>) -> Self {
        Self {
            rx,
            chunks: Vec::new(),
            flushed: false,
        }
    }

    /// Await the flush marker, collecting every chunk still in flight. Also
    /// resolves if the producer goes away without a marker, so teardown can
    /// never hang here.
    pub async fn stop(&mut self) {
        if self.flushed {
            return;
        }
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ChunkMessage::Chunk(chunk) => self.chunks.push(chunk),
                ChunkMessage::Flushed => break,
            }
        }
        self.flushed = true;
        debug!("batch recorder stopped with {} chunks", self.chunks.len());
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate all chunk payloads in capture order. Empty when nothing
    /// was captured; the caller treats the upload as a no-op then.
    pub fn assemble(&self) -> Vec<u8> {
        let total: usize = self.chunks.iter().map(|c| c.bytes.len()).sum();
        let mut payload = Vec::with_capacity(total);
        for chunk in &self.chunks {
            payload.extend_from_slice(&chunk.bytes);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bytes: &[u8]) -> ChunkMessage {
        ChunkMessage::Chunk(EncodedChunk {
            bytes: bytes.to_vec(),
        })
    }

    #[tokio::test]
    async fn stop_collects_chunks_in_capture_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recorder = BatchRecorder::new(rx);

        tx.send(chunk(b"one")).unwrap();
        tx.send(chunk(b"two")).unwrap();
        tx.send(chunk(b"three")).unwrap();
        tx.send(ChunkMessage::Flushed).unwrap();

        recorder.stop().await;
        assert_eq!(recorder.chunk_count(), 3);
        assert_eq!(recorder.assemble(), b"onetwothree");
    }

    #[tokio::test]
    async fn instant_start_stop_assembles_empty_payload() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recorder = BatchRecorder::new(rx);

        tx.send(ChunkMessage::Flushed).unwrap();
        recorder.stop().await;

        assert!(recorder.is_empty());
        assert!(recorder.assemble().is_empty());
    }

    #[tokio::test]
    async fn stop_resolves_when_producer_disappears() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recorder = BatchRecorder::new(rx);

        tx.send(chunk(b"tail")).unwrap();
        drop(tx); // no flush marker

        recorder.stop().await;
        assert_eq!(recorder.assemble(), b"tail");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recorder = BatchRecorder::new(rx);

        tx.send(chunk(b"a")).unwrap();
        tx.send(ChunkMessage::Flushed).unwrap();

        recorder.stop().await;
        recorder.stop().await;
        assert_eq!(recorder.chunk_count(), 1);
    }
}
