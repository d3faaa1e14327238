//! Injectable time sources.
//!
//! All of the tracker's timing (estimator gating, beat phase, silence
//! bookkeeping) flows through a [`TimeSource`], so tests drive a synthetic
//! timeline through [`ManualClock`] instead of sleeping in real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait TimeSource: Send {
    /// Milliseconds elapsed since an arbitrary fixed origin.
    fn now_ms(&self) -> f64;
}

/// Wall clock anchored at construction.
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same timeline: a test keeps one handle and advances it
/// while the tracker owns another.
#[derive(Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the shared timeline by `ms` milliseconds.
    pub fn advance_ms(&self, ms: f64) {
        self.micros
            .fetch_add((ms * 1000.0).round() as u64, Ordering::Relaxed);
    }

    /// Jump the shared timeline to an absolute millisecond value.
    pub fn set_ms(&self, ms: f64) {
        self.micros
            .store((ms * 1000.0).round() as u64, Ordering::Relaxed);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_timeline() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        assert_eq!(clock.now_ms(), 0.0);
        handle.advance_ms(16.5);
        assert!((clock.now_ms() - 16.5).abs() < 1e-3);
        handle.set_ms(1000.0);
        assert!((clock.now_ms() - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
