//! Segment accumulation between the capture callback and the dispatcher.

use super::gate::BackpressureGate;

/// Collects resampled capture audio until enough has buffered for a useful
/// transcode request.
///
/// Appending never blocks and has no length limit other than memory;
/// accumulation keeps running while a request is in flight, and the next
/// successful `try_dispatch` hands over everything buffered since the last
/// one. The buffer is emptied exactly when a segment is handed out, so the
/// same samples are never delivered twice.
pub struct ChunkAccumulator {
    buf: Vec<f32>,
    sample_rate: u32,
    min_segment_secs: f32,
    silence_threshold: Option<f32>,
}

impl ChunkAccumulator {
    pub fn new(sample_rate: u32, min_segment_secs: f32, silence_threshold: Option<f32>) -> Self {
        Self {
            buf: Vec::new(),
            sample_rate,
            min_segment_secs,
            silence_threshold,
        }
    }

    pub fn append(&mut self, block: &[f32]) {
        self.buf.extend_from_slice(block);
    }

    pub fn buffered_secs(&self) -> f32 {
        self.buf.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand out the buffered segment if the minimum window is reached and
    /// the gate is free.
    ///
    /// A segment below the silence threshold is discarded outright (not
    /// re-buffered) so dead air never spams the endpoint. When the gate is
    /// busy the buffer is left alone and keeps growing.
    pub fn try_dispatch(&mut self, gate: &BackpressureGate) -> Option<Vec<f32>> {
        if self.buffered_secs() < self.min_segment_secs {
            return None;
        }

        if let Some(threshold) = self.silence_threshold {
            let mean_abs = self.buf.iter().map(|s| s.abs()).sum::<f32>() / self.buf.len() as f32;
            if mean_abs < threshold {
                self.buf.clear();
                return None;
            }
        }

        if !gate.try_acquire() {
            return None;
        }

        Some(std::mem::take(&mut self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> ChunkAccumulator {
        ChunkAccumulator::new(16000, 2.0, None)
    }

    #[test]
    fn holds_until_minimum_window() {
        let gate = BackpressureGate::new();
        let mut acc = accumulator();
        acc.append(&vec![0.5; 16000]);
        assert!(acc.try_dispatch(&gate).is_none());
        acc.append(&vec![0.5; 16000]);
        let seg = acc.try_dispatch(&gate).expect("2s buffered should dispatch");
        assert_eq!(seg.len(), 32000);
        assert!(acc.is_empty());
    }

    #[test]
    fn busy_gate_keeps_buffer_growing() {
        let gate = BackpressureGate::new();
        assert!(gate.try_acquire());
        let mut acc = accumulator();
        acc.append(&vec![0.5; 48000]);
        assert!(acc.try_dispatch(&gate).is_none());
        assert_eq!(acc.len(), 48000);
        gate.release();
        assert_eq!(acc.try_dispatch(&gate).unwrap().len(), 48000);
    }

    #[test]
    fn never_double_delivers() {
        let gate = BackpressureGate::new();
        let mut acc = accumulator();
        acc.append(&vec![0.5; 32000]);
        assert!(acc.try_dispatch(&gate).is_some());
        gate.release();
        assert!(acc.try_dispatch(&gate).is_none());
    }

    #[test]
    fn rapid_appends_bounded_by_completions() {
        let gate = BackpressureGate::new();
        let mut acc = accumulator();
        let mut dispatches = 0;
        // 100 appends of 0.2s each while nothing ever completes: exactly
        // one dispatch may fire, the rest must buffer behind the gate.
        for _ in 0..100 {
            acc.append(&vec![0.5; 3200]);
            if acc.try_dispatch(&gate).is_some() {
                dispatches += 1;
            }
        }
        assert_eq!(dispatches, 1);
        gate.release();
        let rest = acc.try_dispatch(&gate).unwrap();
        assert_eq!(rest.len() + 32000, 100 * 3200);
    }

    #[test]
    fn silence_is_discarded_not_sent() {
        let gate = BackpressureGate::new();
        let mut acc = ChunkAccumulator::new(16000, 2.0, Some(0.01));
        acc.append(&vec![0.001; 40000]);
        assert!(acc.try_dispatch(&gate).is_none());
        assert!(acc.is_empty(), "silent segment must be dropped, not re-buffered");
        assert!(!gate.is_busy(), "silence must not claim the gate");
    }

    #[test]
    fn loud_audio_passes_the_silence_gate() {
        let gate = BackpressureGate::new();
        let mut acc = ChunkAccumulator::new(16000, 2.0, Some(0.01));
        acc.append(&vec![0.2; 40000]);
        assert!(acc.try_dispatch(&gate).is_some());
    }
}
