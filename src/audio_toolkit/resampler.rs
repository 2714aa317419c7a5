use log::warn;
use rubato::{FftFixedIn, Resampler};

// Input block size fed to rubato per processing pass.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Streams device-rate mono samples through rubato and emits fixed-size
/// frames at the target rate.
///
/// When input and output rates already match, samples pass straight through
/// to the frame fan-out. `finish` drains the partial input block and the
/// partial trailing frame, zero-padded, so no captured audio is lost.
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    in_buf: Vec<f32>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new(in_hz: usize, out_hz: usize, frame_samples: usize) -> Self {
        assert!(frame_samples > 0, "frame size must be non-zero");

        let resampler = (in_hz != out_hz).then(|| {
            FftFixedIn::<f32>::new(in_hz, out_hz, RESAMPLER_CHUNK_SIZE, 1, 1)
                .expect("failed to create resampler")
        });

        Self {
            resampler,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_SIZE),
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn push(&mut self, src: &[f32], mut emit: impl FnMut(&[f32])) {
        let Self {
            resampler,
            in_buf,
            frame_samples,
            pending,
        } = self;
        let Some(resampler) = resampler.as_mut() else {
            // Rates already match.
            collect_frames(pending, *frame_samples, src, &mut emit);
            return;
        };

        in_buf.extend_from_slice(src);
        while in_buf.len() >= RESAMPLER_CHUNK_SIZE {
            let block: Vec<f32> = in_buf.drain(..RESAMPLER_CHUNK_SIZE).collect();
            match resampler.process(&[&block], None) {
                Ok(out) => collect_frames(pending, *frame_samples, &out[0], &mut emit),
                Err(e) => warn!("resampler error, dropping {} samples: {e}", block.len()),
            }
        }
    }

    /// Drain buffered input and the trailing partial frame.
    pub fn finish(&mut self, mut emit: impl FnMut(&[f32])) {
        let Self {
            resampler,
            in_buf,
            frame_samples,
            pending,
        } = self;
        if let Some(resampler) = resampler.as_mut() {
            if !in_buf.is_empty() {
                in_buf.resize(RESAMPLER_CHUNK_SIZE, 0.0);
                match resampler.process(&[&in_buf[..]], None) {
                    Ok(out) => collect_frames(pending, *frame_samples, &out[0], &mut emit),
                    Err(e) => warn!("resampler error, dropping trailing block: {e}"),
                }
                in_buf.clear();
            }
        }

        if !pending.is_empty() {
            pending.resize(*frame_samples, 0.0);
            emit(pending);
            pending.clear();
        }
    }
}

/// Accumulate resampler output and emit every complete frame, keeping the
/// remainder for the next pass.
fn collect_frames(
    pending: &mut Vec<f32>,
    frame_samples: usize,
    data: &[f32],
    emit: &mut impl FnMut(&[f32]),
) {
    pending.extend_from_slice(data);
    let full = pending.len() / frame_samples * frame_samples;
    for frame in pending[..full].chunks_exact(frame_samples) {
        emit(frame);
    }
    pending.drain(..full);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_emits_fixed_frames() {
        let mut rs = FrameResampler::new(16_000, 16_000, 4);
        let mut frames = Vec::new();
        rs.push(&[0.1; 10], |f| frames.push(f.to_vec()));
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4));

        rs.finish(|f| frames.push(f.to_vec()));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], vec![0.1, 0.1, 0.0, 0.0]);
    }

    #[test]
    fn downsampling_roughly_halves_sample_count() {
        let mut rs = FrameResampler::new(32_000, 16_000, 256);
        let mut emitted = 0usize;
        rs.push(&vec![0.0; 32_000], |f| emitted += f.len());
        rs.finish(|f| emitted += f.len());
        // One second of input should come out near one second at 16 kHz,
        // modulo block padding.
        assert!((15_000..=17_500).contains(&emitted), "emitted {emitted}");
    }
}
