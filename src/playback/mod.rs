//! Gapless playback scheduling for synthesized reply audio.

pub mod device;

pub use device::CpalSink;

use crate::audio::decode_pcm16;
use crate::config::ResponseFormat;
use crate::error::{RelayError, Result};

/// Where scheduled samples actually go. The production implementation is
/// [`CpalSink`]; tests drive the scheduler with a scripted clock instead.
pub trait OutputSink: Send {
    /// Current position of the output clock, in seconds since the sink
    /// started. Advances during silence too.
    fn now(&self) -> f64;

    /// Queue mono samples to start playing at `at` seconds on the output
    /// clock. `at` may be in the past; the sink plays what it can.
    fn schedule(&self, samples: Vec<f32>, at: f64);

    /// Block until everything scheduled so far has played out.
    fn drain(&self) {}
}

/// Keeps reply clips back-to-back on the output clock.
///
/// Each clip is scheduled at a running cursor; the cursor then advances by
/// the clip's duration so the next clip starts the instant this one ends.
/// When replies arrive slower than real time the cursor falls behind the
/// clock and is snapped forward, starting the late clip immediately instead
/// of in the past.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    sample_rate: u32,
    response_format: ResponseFormat,
    next_start: f64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>, sample_rate: u32, response_format: ResponseFormat) -> Self {
        Self {
            sink,
            sample_rate,
            response_format,
            next_start: 0.0,
            closed: false,
        }
    }

    /// Decode one reply payload and schedule it at the cursor.
    ///
    /// A payload that fails to decode is logged and dropped; it never stalls
    /// the cursor or the session. Payloads arriving after `close` are
    /// discarded, so an in-flight request finishing during teardown cannot
    /// start audio on a dead session.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        if self.closed {
            tracing::debug!("discarding {} reply bytes after close", bytes.len());
            return;
        }
        let samples = match self.decode(bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("undecodable reply payload dropped: {e}");
                return;
            }
        };
        if samples.is_empty() {
            return;
        }

        let now = self.sink.now();
        if self.next_start < now {
            self.next_start = now;
        }
        let duration = samples.len() as f64 / self.sample_rate as f64;
        self.sink.schedule(samples, self.next_start);
        self.next_start += duration;
    }

    /// Seconds of audio scheduled but not yet played.
    pub fn backlog_secs(&self) -> f64 {
        (self.next_start - self.sink.now()).max(0.0)
    }

    /// Block until the scheduled backlog has played out.
    pub fn drain(&self) {
        self.sink.drain();
    }

    /// Stop accepting new payloads. Already-scheduled audio is unaffected.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        match self.response_format {
            ResponseFormat::RawPcm => decode_pcm16(bytes),
            ResponseFormat::Container => {
                let (samples, rate) = decode_container(bytes)?;
                if rate == self.sample_rate {
                    Ok(samples)
                } else {
                    Ok(fit_to_rate(&samples, rate, self.sample_rate))
                }
            }
        }
    }
}

/// Decode a container-framed clip (MP3, OGG, FLAC, WAV...) to mono samples
/// plus its native rate.
fn decode_container(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| RelayError::Decode(format!("unrecognized container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| RelayError::Decode("no audio track in container".to_string()))?;
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| RelayError::Decode("container missing sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| RelayError::Decode(format!("no decoder for track: {e}")))?;

    let track_id = track.id;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(RelayError::Decode(format!("packet read failed: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| RelayError::Decode(format!("packet decode failed: {e}")))?;
        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend(sample_buf.samples());
    }

    let mono = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved
    };
    Ok((mono, rate))
}

/// Linear-interpolation rate conversion for clips whose native rate differs
/// from the output device. Works in both directions, unlike the capture-path
/// decimator which only downsamples.
fn fit_to_rate(samples: &[f32], rate_in: u32, rate_out: u32) -> Vec<f32> {
    if samples.is_empty() || rate_in == rate_out {
        return samples.to_vec();
    }
    let ratio = rate_in as f64 / rate_out as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encode_wav;
    use std::sync::{Arc, Mutex};

    /// Sink with a hand-cranked clock recording every schedule call.
    #[derive(Clone, Default)]
    struct FakeSink {
        inner: Arc<Mutex<FakeSinkState>>,
    }

    #[derive(Default)]
    struct FakeSinkState {
        clock: f64,
        scheduled: Vec<(usize, f64)>,
    }

    impl FakeSink {
        fn advance(&self, secs: f64) {
            self.inner.lock().unwrap().clock += secs;
        }

        fn scheduled(&self) -> Vec<(usize, f64)> {
            self.inner.lock().unwrap().scheduled.clone()
        }
    }

    impl OutputSink for FakeSink {
        fn now(&self) -> f64 {
            self.inner.lock().unwrap().clock
        }

        fn schedule(&self, samples: Vec<f32>, at: f64) {
            self.inner.lock().unwrap().scheduled.push((samples.len(), at));
        }
    }

    fn wav_secs(secs: f64) -> Vec<u8> {
        encode_wav(&vec![0.25; (24000.0 * secs) as usize], 24000)
    }

    #[test]
    fn clips_are_laid_back_to_back() {
        let sink = FakeSink::default();
        let mut sched = PlaybackScheduler::new(Box::new(sink.clone()), 24000, ResponseFormat::RawPcm);
        sched.enqueue(&wav_secs(1.0));
        sched.enqueue(&wav_secs(0.5));
        sched.enqueue(&wav_secs(2.0));
        let calls = sink.scheduled();
        assert_eq!(calls.len(), 3);
        assert!((calls[0].1 - 0.0).abs() < 1e-9);
        assert!((calls[1].1 - 1.0).abs() < 1e-9);
        assert!((calls[2].1 - 1.5).abs() < 1e-9);
    }

    #[test]
    fn late_clip_snaps_to_the_clock() {
        let sink = FakeSink::default();
        let mut sched = PlaybackScheduler::new(Box::new(sink.clone()), 24000, ResponseFormat::RawPcm);
        sched.enqueue(&wav_secs(1.0));
        // Reply gap: the clock runs 3s past the end of the first clip.
        sink.advance(4.0);
        sched.enqueue(&wav_secs(1.0));
        let calls = sink.scheduled();
        assert!((calls[1].1 - 4.0).abs() < 1e-9, "late clip must start now, not in the past");
        assert!((sched.backlog_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn undecodable_payload_is_dropped_without_moving_the_cursor() {
        let sink = FakeSink::default();
        let mut sched =
            PlaybackScheduler::new(Box::new(sink.clone()), 24000, ResponseFormat::Container);
        sched.enqueue(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(sink.scheduled().is_empty());
        assert_eq!(sched.backlog_secs(), 0.0);
    }

    #[test]
    fn closed_scheduler_discards_payloads() {
        let sink = FakeSink::default();
        let mut sched = PlaybackScheduler::new(Box::new(sink.clone()), 24000, ResponseFormat::RawPcm);
        sched.close();
        sched.enqueue(&wav_secs(1.0));
        assert!(sink.scheduled().is_empty());
    }

    #[test]
    fn container_wav_is_rate_fitted_to_the_sink() {
        let sink = FakeSink::default();
        let mut sched =
            PlaybackScheduler::new(Box::new(sink.clone()), 24000, ResponseFormat::Container);
        // 1s of 48k audio should land as ~1s at 24k.
        sched.enqueue(&encode_wav(&vec![0.25; 48000], 48000));
        let calls = sink.scheduled();
        assert_eq!(calls.len(), 1);
        assert!((calls[0].0 as i64 - 24000).abs() <= 1);
    }

    #[test]
    fn fit_to_rate_preserves_duration() {
        let clip = vec![0.5; 22050];
        let fitted = fit_to_rate(&clip, 22050, 24000);
        assert!((fitted.len() as i64 - 24000).abs() <= 1);
        let identity = fit_to_rate(&clip, 22050, 22050);
        assert_eq!(identity.len(), clip.len());
    }
}
