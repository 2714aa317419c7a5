//! Microphone capture engine.
//!
//! Owns the cpal input stream on a dedicated worker thread (the stream is
//! not `Send`) and fans captured audio out to two independent taps:
//!
//! - a bounded frame tap delivering fixed-size 16 kHz mono frames for the
//!   live streaming path — when the consumer falls behind, frames are
//!   dropped rather than blocking the audio callback;
//! - an unbounded chunk tap delivering encoded segments for the batch
//!   recorder — the accuracy path, never dropped.
//!
//! Teardown is split in two: `halt` stops both taps and flushes the trailing
//! chunk (terminated by a flush marker), `release` drops the stream and
//! returns the device.

use crate::audio_toolkit::pcm;
use crate::audio_toolkit::resampler::FrameResampler;
use crate::error::SessionError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::{mpsc, oneshot};

/// Samples per frame delivered on the frame tap.
pub const FRAME_SAMPLES: usize = 1024;

/// One encoded audio segment cut from the capture stream.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
}

/// Messages on the chunk tap. `Flushed` is sent exactly once, after the
/// final (possibly partial) chunk, when the taps halt.
#[derive(Debug)]
pub enum ChunkMessage {
    Chunk(EncodedChunk),
    Flushed,
}

enum Command {
    Halt,
    Release,
}

/// Names of the available input devices.
pub fn list_input_devices() -> Result<Vec<String>, SessionError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| SessionError::Permission(format!("failed to enumerate input devices: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Shared sample pipeline: mono fold happens in the stream callback, then
/// everything downstream (resample, frame fan-out, chunk cutting) lives
/// here so the worker can flush it after the callback is silenced.
struct CapturePipeline {
    resampler: FrameResampler,
    frame_tx: mpsc::Sender<Vec<f32>>,
    chunk_tx: mpsc::UnboundedSender<ChunkMessage>,
    chunk_buf: Vec<f32>,
    chunk_samples: usize,
    dropped_frames: u64,
}

impl CapturePipeline {
    fn new(
        in_hz: usize,
        frame_tx: mpsc::Sender<Vec<f32>>,
        chunk_tx: mpsc::UnboundedSender<ChunkMessage>,
        chunk_samples: usize,
    ) -> Self {
        // A zero chunk size would make the cutting loop spin forever.
        assert!(chunk_samples > 0, "chunk size must be non-zero");
        Self {
            resampler: FrameResampler::new(in_hz, pcm::SAMPLE_RATE as usize, FRAME_SAMPLES),
            frame_tx,
            chunk_tx,
            chunk_buf: Vec::with_capacity(chunk_samples),
            chunk_samples,
            dropped_frames: 0,
        }
    }

    fn push(&mut self, mono: &[f32]) {
        let Self {
            resampler,
            frame_tx,
            chunk_tx,
            chunk_buf,
            chunk_samples,
            dropped_frames,
        } = self;
        resampler.push(mono, |frame| {
            Self::fan_out(frame, frame_tx, chunk_tx, chunk_buf, *chunk_samples, dropped_frames);
        });
    }

    /// Drain the resampler, cut the final partial chunk, and terminate the
    /// chunk tap with the flush marker.
    fn finish(&mut self) {
        let Self {
            resampler,
            frame_tx,
            chunk_tx,
            chunk_buf,
            chunk_samples,
            dropped_frames,
        } = self;
        resampler.finish(|frame| {
            Self::fan_out(frame, frame_tx, chunk_tx, chunk_buf, *chunk_samples, dropped_frames);
        });

        if !chunk_buf.is_empty() {
            let bytes = pcm::samples_to_pcm16(chunk_buf);
            chunk_buf.clear();
            let _ = chunk_tx.send(ChunkMessage::Chunk(EncodedChunk { bytes }));
        }
        let _ = chunk_tx.send(ChunkMessage::Flushed);

        if self.dropped_frames > 0 {
            warn!(
                "frame tap dropped {} frames under backpressure",
                self.dropped_frames
            );
        }
    }

    fn fan_out(
        frame: &[f32],
        frame_tx: &mpsc::Sender<Vec<f32>>,
        chunk_tx: &mpsc::UnboundedSender<ChunkMessage>,
        chunk_buf: &mut Vec<f32>,
        chunk_samples: usize,
        dropped_frames: &mut u64,
    ) {
        // Live path: drop on backpressure, never block the audio callback.
        if frame_tx.try_send(frame.to_vec()).is_err() {
            *dropped_frames += 1;
        }

        // Accuracy path: accumulate and cut fixed-duration chunks.
        chunk_buf.extend_from_slice(frame);
        while chunk_buf.len() >= chunk_samples {
            let rest = chunk_buf.split_off(chunk_samples);
            let bytes = pcm::samples_to_pcm16(chunk_buf);
            *chunk_buf = rest;
            let _ = chunk_tx.send(ChunkMessage::Chunk(EncodedChunk { bytes }));
        }
    }
}

/// Capture engine entry point. `start` opens the device and returns a handle
/// whose `halt`/`release` drive the teardown sequence.
pub struct AudioCapture;

impl AudioCapture {
    /// Open the named (or default) input device and start both taps.
    ///
    /// Fails with [`SessionError::Permission`] when no usable device exists;
    /// nothing is left half-initialized on failure.
    pub async fn start(
        device_name: Option<String>,
        frame_tx: mpsc::Sender<Vec<f32>>,
        chunk_tx: mpsc::UnboundedSender<ChunkMessage>,
        chunk_samples: usize,
    ) -> Result<CaptureHandle, SessionError> {
        let (init_tx, init_rx) = oneshot::channel();
        let (cmd_tx, cmd_rx) = std_mpsc::channel();

        let worker = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                worker_main(device_name, frame_tx, chunk_tx, chunk_samples, init_tx, cmd_rx);
            })
            .map_err(|e| SessionError::Permission(format!("failed to spawn capture worker: {e}")))?;

        match init_rx.await {
            Ok(Ok(())) => Ok(CaptureHandle {
                cmd_tx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Permission(
                "capture worker exited during startup".into(),
            )),
        }
    }
}

/// Live handle to the capture worker. Dropping the handle releases the
/// device; the explicit two-step teardown is preferred so the caller can
/// await the recorder flush in between.
pub struct CaptureHandle {
    cmd_tx: std_mpsc::Sender<Command>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Halt both taps and flush the trailing chunk. The batch recorder's
    /// `stop` resolves once the flush marker arrives on the chunk tap.
    pub fn halt(&self) {
        let _ = self.cmd_tx.send(Command::Halt);
    }

    /// Drop the input stream and wait for the worker to exit. The device is
    /// released exactly once across all exit paths.
    pub async fn release(mut self) {
        let _ = self.cmd_tx.send(Command::Release);
        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = worker.join();
            })
            .await;
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Release);
    }
}

fn worker_main(
    device_name: Option<String>,
    frame_tx: mpsc::Sender<Vec<f32>>,
    chunk_tx: mpsc::UnboundedSender<ChunkMessage>,
    chunk_samples: usize,
    init_tx: oneshot::Sender<Result<(), SessionError>>,
    cmd_rx: std_mpsc::Receiver<Command>,
) {
    let active = Arc::new(AtomicBool::new(true));
    let pipeline: Arc<Mutex<Option<CapturePipeline>>> = Arc::new(Mutex::new(None));

    let stream = match open_stream(
        device_name,
        frame_tx,
        chunk_tx,
        chunk_samples,
        active.clone(),
        pipeline.clone(),
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(SessionError::Permission(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }
    let _ = init_tx.send(Ok(()));

    let mut halted = false;
    loop {
        match cmd_rx.recv() {
            Ok(Command::Halt) => halt_taps(&active, &pipeline, &mut halted),
            Ok(Command::Release) | Err(_) => break,
        }
    }
    halt_taps(&active, &pipeline, &mut halted);

    drop(stream);
    debug!("input device released");
}

fn halt_taps(
    active: &AtomicBool,
    pipeline: &Mutex<Option<CapturePipeline>>,
    halted: &mut bool,
) {
    if *halted {
        return;
    }
    active.store(false, Ordering::SeqCst);
    if let Some(pipeline) = pipeline.lock().unwrap().as_mut() {
        pipeline.finish();
    }
    *halted = true;
    debug!("capture taps halted and flushed");
}

fn open_stream(
    device_name: Option<String>,
    frame_tx: mpsc::Sender<Vec<f32>>,
    chunk_tx: mpsc::UnboundedSender<ChunkMessage>,
    chunk_samples: usize,
    active: Arc<AtomicBool>,
    pipeline: Arc<Mutex<Option<CapturePipeline>>>,
) -> Result<cpal::Stream, SessionError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(ref name) => host
            .input_devices()
            .map_err(|e| SessionError::Permission(format!("failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| SessionError::Permission(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| SessionError::Permission("no default input device".into()))?,
    };

    let config = device
        .default_input_config()
        .map_err(|e| SessionError::Permission(format!("no usable input config: {e}")))?;
    let channels = config.channels() as usize;
    let in_hz = config.sample_rate().0 as usize;

    info!(
        "capturing from '{}' at {} Hz, {} channel(s)",
        device.name().unwrap_or_else(|_| "unknown".into()),
        in_hz,
        channels
    );

    *pipeline.lock().unwrap() = Some(CapturePipeline::new(in_hz, frame_tx, chunk_tx, chunk_samples));

    let err_fn = |err: cpal::StreamError| error!("input stream error: {err}");

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[f32], _| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let mono = fold_to_mono(data, channels);
                if let Some(pipeline) = pipeline.lock().unwrap().as_mut() {
                    pipeline.push(&mono);
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[i16], _| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let as_f32: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let mono = fold_to_mono(&as_f32, channels);
                if let Some(pipeline) = pipeline.lock().unwrap().as_mut() {
                    pipeline.push(&mono);
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(SessionError::Permission(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }
    .map_err(|e| SessionError::Permission(format!("failed to open input stream: {e}")))?;

    Ok(stream)
}

/// Average interleaved channels down to mono.
fn fold_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_with_channels(
        chunk_samples: usize,
        frame_cap: usize,
    ) -> (
        CapturePipeline,
        mpsc::Receiver<Vec<f32>>,
        mpsc::UnboundedReceiver<ChunkMessage>,
    ) {
        let (frame_tx, frame_rx) = mpsc::channel(frame_cap);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        (
            CapturePipeline::new(16_000, frame_tx, chunk_tx, chunk_samples),
            frame_rx,
            chunk_rx,
        )
    }

    #[test]
    fn chunks_are_cut_at_fixed_size_in_order() {
        let (mut pipeline, _frames, mut chunks) = pipeline_with_channels(FRAME_SAMPLES, 64);

        pipeline.push(&vec![0.5; FRAME_SAMPLES * 2]);
        pipeline.finish();

        let mut payloads = Vec::new();
        while let Ok(msg) = chunks.try_recv() {
            match msg {
                ChunkMessage::Chunk(c) => payloads.push(c.bytes),
                ChunkMessage::Flushed => break,
            }
        }
        assert_eq!(payloads.len(), 2);
        assert!(payloads.iter().all(|p| p.len() == FRAME_SAMPLES * 2));
    }

    #[test]
    fn finish_flushes_partial_chunk_and_marker() {
        let (mut pipeline, _frames, mut chunks) = pipeline_with_channels(FRAME_SAMPLES * 4, 64);

        pipeline.push(&vec![0.1; FRAME_SAMPLES]);
        pipeline.finish();

        match chunks.try_recv().unwrap() {
            ChunkMessage::Chunk(c) => assert_eq!(c.bytes.len(), FRAME_SAMPLES * 2),
            other => panic!("expected chunk, got {other:?}"),
        }
        assert!(matches!(chunks.try_recv().unwrap(), ChunkMessage::Flushed));
    }

    #[test]
    fn full_frame_tap_drops_without_stalling_chunks() {
        // Frame tap capacity 1: the second frame is dropped, chunks are not.
        let (mut pipeline, mut frames, mut chunks) = pipeline_with_channels(FRAME_SAMPLES, 1);

        pipeline.push(&vec![0.2; FRAME_SAMPLES * 2]);
        pipeline.finish();

        let mut frame_count = 0;
        while frames.try_recv().is_ok() {
            frame_count += 1;
        }
        assert_eq!(frame_count, 1);
        assert_eq!(pipeline.dropped_frames, 1);

        let mut chunk_count = 0;
        while let Ok(ChunkMessage::Chunk(_)) = chunks.try_recv() {
            chunk_count += 1;
        }
        assert_eq!(chunk_count, 2);
    }

    #[test]
    #[should_panic(expected = "chunk size must be non-zero")]
    fn zero_chunk_size_is_rejected() {
        pipeline_with_channels(0, 4);
    }

    #[test]
    fn mono_fold_averages_interleaved_channels() {
        assert_eq!(fold_to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(fold_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }
}
