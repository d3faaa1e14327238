// Analysis module - per-frame beat tracking pipeline
//
// This module orchestrates the complete tracking pipeline, consuming one
// spectrum frame per call from the host's frame loop and producing the
// per-frame beat report for rendering consumers.
//
// Architecture:
// - BeatTracker: synchronous facade owning all mutable state
// - Pipeline: OnsetDetector -> onset history ring -> TempoEstimator
//   (timer-gated) -> BeatClock
// - Output: BeatReport returned from process(), no channels, no threads

use serde::{Deserialize, Serialize};

use crate::clock::{TimeSource, WallClock};
use crate::config::TrackerConfig;
use crate::error::ConfigError;
use crate::ring::RingBuffer;

pub mod bands;
pub mod beat;
pub mod onset;
pub mod tempo;

use beat::BeatClock;
use onset::OnsetDetector;
use tempo::TempoEstimator;

pub use bands::bin_for_frequency;
pub use tempo::LockState;

/// Capacity of the onset history ring (~8.5 s at 60 Hz).
const ONSET_HISTORY_LEN: usize = 512;

/// How often the debug onset-history peak refreshes, in milliseconds.
/// Scanning the ring per frame would defeat the per-frame cost bound.
const DEBUG_REFRESH_MS: f64 = 500.0;

/// Per-frame tracker output
///
/// Sent to rendering/UI consumers once per `process()` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BeatReport {
    /// Rounded current tempo estimate
    pub bpm: u32,
    /// Smoothed confidence in the tempo estimate (0.0-1.0)
    pub confidence: f32,
    /// True only on the frame a beat is accepted
    pub beat: bool,
    /// Position within the current beat cycle (0.0-1.0)
    pub beat_phase: f32,
    /// Display-oriented instantaneous signal activity; not gated
    /// identically to `beat`
    pub beat_strength: f32,
    /// True only on beats that complete a 4-beat cycle
    pub downbeat: bool,
    /// Monotonically increasing total of accepted beats
    pub beat_count: u64,
}

/// Instantaneous state of one band, for debug overlays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandDebug {
    pub name: String,
    pub energy: f32,
    pub threshold: f32,
}

/// Debug telemetry snapshot
///
/// The onset-history peak is refreshed periodically, not per frame, to
/// bound the cost of debug polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub bands: Vec<BandDebug>,
    pub onset_peak: f32,
    pub raw_confidence: f32,
    pub lock: String,
}

/// Real-time beat/tempo tracker
///
/// Owns all mutable state exclusively; single-threaded and synchronous.
/// `process()` is called once per rendering frame with the current
/// spectrum snapshot; `reset()` may be called between frames to return to
/// initial state without reallocating.
pub struct BeatTracker {
    config: TrackerConfig,
    time: Box<dyn TimeSource>,
    onset: OnsetDetector,
    onset_history: RingBuffer,
    tempo: TempoEstimator,
    beat: BeatClock,
    silent_since_ms: Option<f64>,
    debug_peak: f32,
    debug_refreshed_ms: f64,
}

impl BeatTracker {
    /// Build a tracker with default configuration and the wall clock.
    pub fn new() -> Self {
        Self::with_time_source(TrackerConfig::default(), Box::new(WallClock::new()))
            .expect("default configuration is valid")
    }

    /// Build a tracker from an explicit configuration.
    pub fn with_config(config: TrackerConfig) -> Result<Self, ConfigError> {
        Self::with_time_source(config, Box::new(WallClock::new()))
    }

    /// Build a tracker with an injected time source.
    ///
    /// Tests pass a `ManualClock` here to drive synthetic timelines.
    pub fn with_time_source(
        config: TrackerConfig,
        time: Box<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let onset = OnsetDetector::new(&config.onset, &config.spectrum);
        let tempo = TempoEstimator::new(config.tempo.clone());
        let beat = BeatClock::new(config.beat.clone());
        Ok(Self {
            config,
            time,
            onset,
            onset_history: RingBuffer::new(ONSET_HISTORY_LEN),
            tempo,
            beat,
            silent_since_ms: None,
            debug_peak: 0.0,
            debug_refreshed_ms: 0.0,
        })
    }

    /// Process one spectrum frame and produce the frame's beat report.
    ///
    /// # Arguments
    /// * `spectrum` - normalized magnitudes (0.0-1.0), log-spaced across
    ///   the configured frequency bounds
    pub fn process(&mut self, spectrum: &[f32]) -> BeatReport {
        let now = self.time.now_ms();
        self.tempo.note_frame(now);

        let frame = self.onset.process(spectrum);
        self.onset_history.push(frame.raw_flux);

        self.track_silence(now, frame.total_energy);

        self.tempo.maybe_update(now, &self.onset_history);
        self.beat.set_interval(self.tempo.interval_ms());

        let decision = self.beat.process(now, frame.strength, frame.kick);

        if now - self.debug_refreshed_ms >= DEBUG_REFRESH_MS {
            self.debug_peak = self
                .onset_history
                .recent_max(self.config.tempo.corr_window);
            self.debug_refreshed_ms = now;
        }

        BeatReport {
            bpm: self.tempo.bpm().round() as u32,
            confidence: self.tempo.confidence(),
            beat: decision.beat,
            beat_phase: self.beat.phase(),
            beat_strength: frame.kick.clamp(0.0, 1.0),
            downbeat: decision.downbeat,
            beat_count: self.beat.beat_count(),
        }
    }

    /// Silence bookkeeping: sustained sub-epsilon energy drops the tempo
    /// state to idle; any energy above epsilon clears it immediately.
    fn track_silence(&mut self, now: f64, total_energy: f32) {
        if total_energy < self.config.onset.silence_epsilon {
            match self.silent_since_ms {
                None => self.silent_since_ms = Some(now),
                Some(since) => {
                    if now - since >= self.config.onset.silence_hold_ms && !self.tempo.is_idle() {
                        self.tempo.reset_to_idle();
                        // stale periodicity must not resurrect confidence
                        // while the input is still silent
                        self.onset_history.clear();
                    }
                }
            }
        } else {
            self.silent_since_ms = None;
            self.tempo.exit_idle();
        }
    }

    /// Manual tap-tempo path; bypasses the autocorrelation pipeline.
    ///
    /// # Arguments
    /// * `now_ms` - caller-provided timestamp on the same timeline as the
    ///   tracker's time source
    pub fn tap_tempo(&mut self, now_ms: f64) {
        if let Some(bpm) = self.beat.tap(now_ms) {
            self.tempo.apply_manual(bpm);
            self.beat.set_interval(self.tempo.interval_ms());
        }
    }

    /// Return all adaptive and history state to initial values.
    ///
    /// Band layout, ring capacities, and configuration are kept; nothing
    /// is reallocated.
    pub fn reset(&mut self) {
        self.onset.reset();
        self.onset_history.clear();
        self.tempo.reset();
        self.beat.reset();
        self.silent_since_ms = None;
        self.debug_peak = 0.0;
        self.debug_refreshed_ms = 0.0;
        log::info!("[BeatTracker] reset");
    }

    pub fn bpm(&self) -> f32 {
        self.tempo.bpm()
    }

    pub fn confidence(&self) -> f32 {
        self.tempo.confidence()
    }

    pub fn beat_phase(&self) -> f32 {
        self.beat.phase()
    }

    pub fn lock_state(&self) -> LockState {
        self.tempo.lock_state()
    }

    /// Debug telemetry: per-band instantaneous energies plus the
    /// periodically refreshed maximum of recent onset history.
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        DebugSnapshot {
            bands: self
                .onset
                .band_energies()
                .map(|(name, energy, threshold)| BandDebug {
                    name: name.to_string(),
                    energy,
                    threshold,
                })
                .collect(),
            onset_peak: self.debug_peak,
            raw_confidence: self.tempo.raw_confidence(),
            lock: format!("{:?}", self.tempo.lock_state()),
        }
    }
}

impl Default for BeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker_with_clock() -> (BeatTracker, ManualClock) {
        let clock = ManualClock::new();
        let tracker =
            BeatTracker::with_time_source(TrackerConfig::default(), Box::new(clock.clone()))
                .unwrap();
        (tracker, clock)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = TrackerConfig::default();
        config.tempo.min_bpm = 0.0;
        assert!(BeatTracker::with_config(config).is_err());
    }

    #[test]
    fn test_process_accepts_short_frames() {
        let (mut tracker, clock) = tracker_with_clock();
        // degenerate input reads as silence, not a panic
        let report = tracker.process(&[]);
        assert_eq!(report.beat_strength, 0.0);
        clock.advance_ms(20.0);
        tracker.process(&[0.5; 16]);
    }

    #[test]
    fn test_tap_tempo_sets_bpm_and_confidence() {
        let (mut tracker, _clock) = tracker_with_clock();
        tracker.tap_tempo(1_000.0);
        tracker.tap_tempo(1_500.0);
        assert!((tracker.bpm() - 120.0).abs() < 0.5);
        assert!(tracker.confidence() > 0.0);
    }

    #[test]
    fn test_debug_snapshot_names_bands() {
        let (mut tracker, clock) = tracker_with_clock();
        for _ in 0..5 {
            tracker.process(&vec![0.1; 512]);
            clock.advance_ms(20.0);
        }
        let snapshot = tracker.debug_snapshot();
        assert_eq!(snapshot.bands.len(), 3);
        assert_eq!(snapshot.bands[0].name, "kick");
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let (mut tracker, clock) = tracker_with_clock();
        tracker.tap_tempo(0.0);
        tracker.tap_tempo(400.0); // 150 BPM
        for _ in 0..10 {
            tracker.process(&vec![0.2; 512]);
            clock.advance_ms(20.0);
        }
        tracker.reset();
        assert_eq!(tracker.bpm(), 120.0);
        assert_eq!(tracker.confidence(), 0.0);
        assert_eq!(tracker.beat_phase(), 0.0);
        assert_eq!(tracker.debug_snapshot().onset_peak, 0.0);
    }
}
