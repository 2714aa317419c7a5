//! PCM sample conversion and WAV assembly.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Everything downstream of capture runs at 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16_000;

/// Convert one normalized sample to signed 16-bit.
///
/// Negative values scale by 32768 and positive values by 32767 so the full
/// [-1, 1] input range lands inside [-32768, 32767] without overflow. Inputs
/// outside [-1, 1] are clamped first.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Encode a block of samples as little-endian PCM16 bytes.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

/// Wrap raw little-endian PCM16 bytes in a mono 16 kHz WAV container.
pub fn pcm16_to_wav(pcm: &[u8]) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_covers_exact_bounds() {
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn conversion_uses_asymmetric_scaling() {
        assert_eq!(sample_to_i16(-0.5), -16384);
        assert_eq!(sample_to_i16(0.5), 16384); // round(0.5 * 32767)
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(sample_to_i16(-2.0), i16::MIN);
        assert_eq!(sample_to_i16(3.5), i16::MAX);
        assert_eq!(sample_to_i16(f32::NEG_INFINITY), i16::MIN);
    }

    #[test]
    fn every_sample_stays_in_i16_range() {
        let mut s = -1.0f32;
        while s <= 1.0 {
            let v = sample_to_i16(s) as i32;
            assert!((i16::MIN as i32..=i16::MAX as i32).contains(&v), "sample {s}");
            s += 1.0 / 4096.0;
        }
    }

    #[test]
    fn pcm16_bytes_are_little_endian() {
        let bytes = samples_to_pcm16(&[0.0, -1.0]);
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn wav_container_round_trips_samples() {
        let pcm = samples_to_pcm16(&[0.25, -0.25, 1.0]);
        let wav = pcm16_to_wav(&pcm).unwrap();
        assert_eq!(&wav[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![8192, -8192, i16::MAX]);
    }
}
