//! WAV container codec: float PCM to mono 16-bit RIFF and back.

use std::io::Cursor;

use crate::error::{RelayError, Result};

/// Encode float samples as a mono 16-bit PCM WAV buffer.
///
/// Samples are clipped to [-1, 1] and scaled to i16; output is deterministic
/// byte-for-byte for identical input.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut wav_cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut wav_cursor, spec).expect("Failed to create memory writer");
        for &sample in samples {
            let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(quantized)
                .expect("Failed to write sample");
        }
        writer.finalize().expect("Failed to finalize WAV");
    }
    wav_cursor.into_inner()
}

/// Decode 16-bit PCM response bytes to float samples.
///
/// Accepts a WAV-framed buffer (detected by the RIFF magic) or a headerless
/// little-endian i16 buffer. Some services stream PCM without a valid header,
/// so a framed buffer the WAV reader rejects falls back to the raw
/// interpretation rather than failing.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        return Err(RelayError::Decode("empty audio payload".to_string()));
    }
    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        match decode_wav_framed(bytes) {
            Ok(samples) => return Ok(samples),
            Err(e) => {
                tracing::debug!("WAV reader rejected RIFF-framed buffer ({e}); treating as raw PCM");
            }
        }
    }
    Ok(decode_raw_i16(bytes))
}

fn decode_wav_framed(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<i16>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()?,
    };

    if spec.channels > 1 {
        Ok(samples
            .chunks(spec.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect())
    } else {
        Ok(samples)
    }
}

/// Interpret bytes as headerless little-endian i16 PCM. A trailing odd byte
/// is dropped.
pub fn decode_raw_i16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
