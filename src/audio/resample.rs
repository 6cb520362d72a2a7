//! Box-filter decimation for capture-side downsampling.

use crate::error::{RelayError, Result};

/// Downsample `samples` from `rate_in` to `rate_out` by averaging the source
/// window behind each output sample.
///
/// Deliberately a box filter, not polyphase: speech headed for a
/// transcription model does not justify the extra machinery, and the
/// averaging already tames most aliasing. Equal rates are an identity;
/// upsampling is refused.
pub fn resample(samples: &[f32], rate_in: u32, rate_out: u32) -> Result<Vec<f32>> {
    if rate_in == 0 || rate_out == 0 || rate_out > rate_in {
        return Err(RelayError::InvalidRate {
            from: rate_in,
            to: rate_out,
        });
    }
    if rate_out == rate_in {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let ratio = rate_in as f64 / rate_out as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = ((i as f64 * ratio).round() as usize).min(samples.len() - 1);
        let end = (((i + 1) as f64 * ratio).round() as usize).clamp(start + 1, samples.len());
        let window = &samples[start..end];
        out.push(window.iter().sum::<f32>() / window.len() as f32);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_are_identity() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample(&input, 44100, 44100).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn upsampling_is_rejected() {
        assert!(matches!(
            resample(&[0.0; 16], 16000, 44100),
            Err(RelayError::InvalidRate { from: 16000, to: 44100 })
        ));
        assert!(resample(&[0.0; 16], 0, 16000).is_err());
    }

    #[test]
    fn output_length_matches_rate_ratio() {
        for (rate_in, rate_out, len) in [
            (44100u32, 16000u32, 4410usize),
            (48000, 16000, 4800),
            (44100, 22050, 4410),
            (48000, 44100, 9600),
        ] {
            let input = vec![0.25f32; len];
            let out = resample(&input, rate_in, rate_out).unwrap();
            let expected = (len as f64 * rate_out as f64 / rate_in as f64).round() as usize;
            assert!(
                (out.len() as i64 - expected as i64).abs() <= 1,
                "{rate_in}->{rate_out}: got {}, expected ~{expected}",
                out.len()
            );
        }
    }

    #[test]
    fn constant_signal_survives_decimation() {
        let input = vec![0.5f32; 44100];
        let out = resample(&input, 44100, 16000).unwrap();
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample(&[], 44100, 16000).unwrap().is_empty());
    }
}
