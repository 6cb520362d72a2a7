//! Error taxonomy for the relay pipeline.

use std::fmt;

/// Every failure the relay surfaces to a caller.
///
/// Fatal-to-start variants (`PermissionDenied`, `NoAudioTrack`,
/// `ModelWarmup`) move the session to `ConnectionState::Error`; the
/// per-segment variants (`Transcode`, `Decode`) are recovered locally and
/// never terminate a running session.
#[derive(Debug)]
pub enum RelayError {
    /// Capture was declined by the user or the OS.
    PermissionDenied,
    /// Capture was granted but carries no usable audio.
    NoAudioTrack,
    /// The transcoding endpoint did not answer at all.
    EndpointUnreachable(String),
    /// The endpoint answered with a bad status or a malformed body.
    Transcode {
        status: Option<u16>,
        detail: String,
    },
    /// Response audio could not be decoded.
    Decode(String),
    /// Dependent-model warm-up failed.
    ModelWarmup(String),
    /// Resampler asked to upsample, or given a zero rate.
    InvalidRate { from: u32, to: u32 },
    /// Capture-side device failure other than permission/no-track.
    Capture(String),
    /// Output-side device failure.
    Playback(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::PermissionDenied => write!(f, "capture permission denied"),
            RelayError::NoAudioTrack => write!(f, "capture source has no audio track"),
            RelayError::EndpointUnreachable(detail) => {
                write!(f, "endpoint unreachable: {detail}")
            }
            RelayError::Transcode {
                status: Some(code),
                detail,
            } => write!(f, "transcode failed (HTTP {code}): {detail}"),
            RelayError::Transcode {
                status: None,
                detail,
            } => write!(f, "transcode failed: {detail}"),
            RelayError::Decode(detail) => write!(f, "audio decode failed: {detail}"),
            RelayError::ModelWarmup(detail) => write!(f, "model warm-up failed: {detail}"),
            RelayError::InvalidRate { from, to } => {
                write!(f, "unsupported resample {from}Hz -> {to}Hz (only downsampling)")
            }
            RelayError::Capture(detail) => write!(f, "capture failed: {detail}"),
            RelayError::Playback(detail) => write!(f, "playback failed: {detail}"),
        }
    }
}

impl std::error::Error for RelayError {}

pub type Result<T> = std::result::Result<T, RelayError>;
