//! Segment dispatch: WAV framing, the HTTP round-trip, and reply routing.

use std::io::Read;
use std::sync::{Arc, Mutex};

use crate::audio::{BackpressureGate, encode_wav};
use crate::error::Result;
use crate::net::endpoint::{TranscodeEndpoint, TranscodeReply};
use crate::playback::PlaybackScheduler;

const STREAM_READ_CHUNK: usize = 4096;

/// Owns one transcode round-trip at a time: frames a segment as WAV, posts
/// it, and feeds whatever comes back into the playback scheduler.
///
/// Cheap to clone; clones share the endpoint and the gate.
#[derive(Clone)]
pub struct TranscodeDispatcher {
    endpoint: Arc<dyn TranscodeEndpoint>,
    gate: Arc<BackpressureGate>,
    segment_sample_rate: u32,
}

impl TranscodeDispatcher {
    pub fn new(
        endpoint: Arc<dyn TranscodeEndpoint>,
        gate: Arc<BackpressureGate>,
        segment_sample_rate: u32,
    ) -> Self {
        Self {
            endpoint,
            gate,
            segment_sample_rate,
        }
    }

    /// Run one full round-trip for an already-acquired gate. The gate is
    /// released when this returns, success or not, so a failed request can
    /// never wedge the pipeline.
    pub fn send(&self, segment: Vec<f32>, playback: &Mutex<PlaybackScheduler>) -> Result<()> {
        let _guard = self.gate.release_guard();

        let secs = segment.len() as f32 / self.segment_sample_rate as f32;
        let wav = encode_wav(&segment, self.segment_sample_rate);
        tracing::debug!(
            segment_secs = secs,
            wav_bytes = wav.len(),
            "dispatching segment"
        );

        match self.endpoint.transcode(&wav)? {
            TranscodeReply::Payload(bytes) => {
                playback.lock().unwrap().enqueue(&bytes);
            }
            TranscodeReply::Stream(reader) => {
                self.pump_stream(reader, playback);
            }
        }
        Ok(())
    }

    /// Forward a raw PCM byte stream to playback in i16-aligned slices so a
    /// sample split across two reads is never decoded as two half-samples.
    fn pump_stream(&self, mut reader: Box<dyn Read>, playback: &Mutex<PlaybackScheduler>) {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; STREAM_READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    let aligned = pending.len() & !1;
                    if aligned > 0 {
                        playback.lock().unwrap().enqueue(&pending[..aligned]);
                        pending.drain(..aligned);
                    }
                }
                Err(e) => {
                    tracing::warn!("response stream ended early: {e}");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            tracing::debug!("dropping trailing odd byte from response stream");
        }
    }
}
