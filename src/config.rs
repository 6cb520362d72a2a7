//! Session configuration and tuned policy constants.

use serde::{Deserialize, Serialize};

/// Shape of the audio the transcoding endpoint replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// Headerless (or WAV-framed) 16-bit PCM at `playback_sample_rate`.
    /// Streamed replies can start playing before the body finishes.
    RawPcm,
    /// An arbitrary container (mp3/ogg/...); clips are decoded whole and
    /// queued strictly sequentially since duration is unknown until decode.
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Transcoding endpoint, e.g. `http://127.0.0.1:8008/api/speech`.
    pub endpoint_url: String,
    /// Resolved model identifier. Discovery is the host's problem; the relay
    /// only forwards the string.
    pub model: String,
    /// Rate segments are downsampled to before dispatch.
    pub target_sample_rate: u32,
    /// Rate of raw PCM replies and of the output sink.
    pub playback_sample_rate: u32,
    /// Minimum buffered audio before a dispatch. Smaller trades latency for
    /// transcription/translation quality.
    pub min_segment_secs: f32,
    /// Mean-absolute-amplitude floor below which a segment is discarded as
    /// dead air instead of being sent. `None` disables the gate.
    pub silence_threshold: Option<f32>,
    /// Catch-all flush interval for bursty capture delivery.
    pub flush_interval_ms: u64,
    /// Reachability probe timeout. The probe only needs "something answered".
    pub probe_timeout_secs: u64,
    /// Per-request timeout for transcode round-trips.
    pub request_timeout_secs: u64,
    /// When true, a failed warm-up aborts the whole start.
    pub warmup_required: bool,
    pub response_format: ResponseFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://127.0.0.1:8008/api/speech".to_string(),
            model: String::new(),
            target_sample_rate: 16000,
            playback_sample_rate: 24000,
            min_segment_secs: 2.5,
            silence_threshold: Some(0.01),
            flush_interval_ms: 1000,
            probe_timeout_secs: 3,
            request_timeout_secs: 120,
            warmup_required: false,
            response_format: ResponseFormat::RawPcm,
        }
    }
}
