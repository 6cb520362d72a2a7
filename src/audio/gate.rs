//! Single-request backpressure gate.

use std::sync::atomic::{AtomicBool, Ordering};

/// Check-and-set flag guaranteeing at most one transcode round-trip is
/// outstanding per session. Without it, a capture callback firing every
/// ~93 ms could launch unbounded concurrent requests.
#[derive(Debug, Default)]
pub struct BackpressureGate {
    busy: AtomicBool,
}

impl BackpressureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the gate. Returns false if a round-trip is already
    /// in flight.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Release-on-drop handle for a gate the caller already acquired, so no
    /// dispatch path can leak a "busy" state.
    pub fn release_guard(&self) -> GateGuard<'_> {
        GateGuard { gate: self }
    }
}

pub struct GateGuard<'a> {
    gate: &'a BackpressureGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = BackpressureGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(gate.is_busy());
        gate.release();
        assert!(gate.try_acquire());
    }

    #[test]
    fn guard_releases_on_drop() {
        let gate = BackpressureGate::new();
        assert!(gate.try_acquire());
        {
            let _guard = gate.release_guard();
            assert!(gate.is_busy());
        }
        assert!(!gate.is_busy());
    }
}
