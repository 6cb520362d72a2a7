//! Capture side: pulling the shared system/tab audio into the pipeline.

pub mod loopback;

pub use loopback::SystemLoopback;

use std::sync::mpsc;

use crate::error::Result;

/// One callback's worth of captured audio, already downmixed to mono but
/// still at the device's native rate.
pub struct CaptureBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A source of shared audio. The production implementation is
/// [`SystemLoopback`]; tests feed scripted blocks through the same seam.
///
/// A source that turns out to carry no audio at all (a video-only share,
/// a missing loopback device) must fail `start` rather than deliver
/// silence forever. A source whose acquisition also grabs a video track
/// must release that track during `start`; only audio leaves this seam.
pub trait CaptureSource: Send {
    /// Begin capturing, pushing blocks into `sink`. Must not block the
    /// caller beyond device setup.
    fn start(&mut self, sink: mpsc::Sender<CaptureBlock>) -> Result<()>;

    /// Stop capturing and release the device. Safe to call more than once.
    fn stop(&mut self);

    /// RMS level of the most recent block, in [0, 1]. Diagnostic only.
    fn input_level(&self) -> f32;
}
