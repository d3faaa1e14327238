// Beatsense - real-time beat and tempo tracking core
//
// Consumes one spectrum snapshot per rendering frame (produced by an
// external FFT stage) and derives tempo, a phase-aligned beat signal, and a
// confidence score. No audio I/O, no threads, no persistence of its own.

// Module declarations
pub mod analysis;
pub mod clock;
pub mod config;
pub mod error;
pub mod ring;

// Re-exports for convenience
pub use analysis::{BandDebug, BeatReport, BeatTracker, DebugSnapshot, LockState};
pub use clock::{ManualClock, TimeSource, WallClock};
pub use config::TrackerConfig;
pub use error::ConfigError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_surface_builds() {
        let tracker = BeatTracker::new();
        assert_eq!(tracker.confidence(), 0.0);
    }
}
