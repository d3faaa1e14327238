//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. All algorithm parameters
//! (band layout, thresholds, tempo range, smoothing coefficients) can be
//! adjusted via the config file for rapid experimentation; defaults match
//! the tuned values used by the visualizer host.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Complete tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub spectrum: SpectrumConfig,
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
    pub beat: BeatConfig,
}

/// Shape of the spectrum frames handed to `process()`
///
/// The external analysis stage produces a fixed-length array of normalized
/// magnitudes, logarithmically spaced between `min_hz` and `max_hz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumConfig {
    /// Number of magnitude bins per frame
    pub bins: usize,
    /// Frequency of bin 0 in Hz
    pub min_hz: f32,
    /// Frequency of the last bin in Hz
    pub max_hz: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            bins: 512,
            min_hz: 20.0,
            max_hz: 20000.0,
        }
    }
}

/// One frequency band of the onset detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    pub name: String,
    pub low_hz: f32,
    pub high_hz: f32,
    /// Relative contribution to the combined onset signal
    pub weight: f32,
}

/// Onset detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Band layout; the first band drives the beat-strength display
    pub bands: Vec<BandConfig>,
    /// Running-mean multiplier: only energy above `mean * margin` counts as
    /// deviation
    pub mean_margin: f32,
    /// Mix between rectified flux and deviation in the per-band onset value
    /// (flux gets `flux_mix`, deviation gets the remainder)
    pub flux_mix: f32,
    /// Lower bound for every band's adaptive threshold
    pub threshold_floor: f32,
    /// How hard a triggering onset pushes the threshold up
    pub threshold_adapt: f32,
    /// Geometric decay factor pulling the threshold back to the floor
    pub threshold_decay: f32,
    /// Length of each band's rolling energy history, in frames
    pub energy_window: usize,
    /// Total band energy below this reads as silence
    pub silence_epsilon: f32,
    /// Continuous silence longer than this resets tempo state to idle
    pub silence_hold_ms: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                BandConfig {
                    name: "kick".to_string(),
                    low_hz: 40.0,
                    high_hz: 120.0,
                    weight: 1.0,
                },
                BandConfig {
                    name: "snare".to_string(),
                    low_hz: 150.0,
                    high_hz: 500.0,
                    weight: 0.7,
                },
                BandConfig {
                    name: "hihat".to_string(),
                    low_hz: 5000.0,
                    high_hz: 12000.0,
                    weight: 0.4,
                },
            ],
            mean_margin: 1.3,
            flux_mix: 0.7,
            threshold_floor: 0.01,
            threshold_adapt: 0.3,
            threshold_decay: 0.92,
            energy_window: 45,
            silence_epsilon: 1e-3,
            silence_hold_ms: 3000.0,
        }
    }
}

/// Tempo estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Musically common sub-range that gets a soft correlation boost
    pub preferred_low_bpm: f32,
    pub preferred_high_bpm: f32,
    pub preferred_boost: f32,
    /// Minimum wall-clock time between autocorrelation passes
    pub update_interval_ms: f64,
    /// Capacity of the median-filtered estimate history
    pub history_len: usize,
    /// Recent onset-history window scanned per lag, in frames
    pub corr_window: usize,
    /// Sampling stride inside the correlation window. Odd, so that
    /// even-period impulse trains cannot hide on a skipped parity
    pub corr_stride: usize,
    /// Best correlation below this floor means "no reliable tempo found"
    pub corr_floor: f32,
    /// Relative tolerance for folding doubled/halved readings
    pub octave_tolerance: f32,
    /// Smoothed confidence must cross this to anchor a lock
    pub lock_confidence: f32,
    /// Relative tolerance for an estimate to count toward the lock streak
    pub lock_tolerance: f32,
    /// Rise coefficient of the asymmetric confidence low-pass
    pub confidence_rise: f32,
    /// Fall coefficient (halved again while locked)
    pub confidence_fall: f32,
    /// Neutral BPM reported while idle (after a silence reset)
    pub idle_bpm: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 180.0,
            preferred_low_bpm: 85.0,
            preferred_high_bpm: 135.0,
            preferred_boost: 1.2,
            update_interval_ms: 750.0,
            history_len: 7,
            corr_window: 256,
            corr_stride: 3,
            corr_floor: 0.05,
            octave_tolerance: 0.10,
            lock_confidence: 0.6,
            lock_tolerance: 0.08,
            confidence_rise: 0.25,
            confidence_fall: 0.06,
            idle_bpm: 120.0,
        }
    }
}

/// Beat clock parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatConfig {
    /// Wrapped-phase window around 0 where a strong onset confirms a beat
    pub phase_window: f32,
    /// Onset or kick strength needed for an onset-confirmed beat
    pub trigger_floor: f32,
    /// Fraction of the phase error absorbed on a confirmed beat
    pub correction_gain: f32,
    /// Number of recent tap intervals averaged into the manual tempo
    pub tap_window: usize,
    /// Tap intervals outside this BPM range restart the tap sequence
    pub tap_min_bpm: f32,
    pub tap_max_bpm: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            phase_window: 0.12,
            trigger_floor: 0.25,
            correction_gain: 0.3,
            tap_window: 4,
            tap_min_bpm: 30.0,
            tap_max_bpm: 300.0,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            spectrum: SpectrumConfig::default(),
            onset: OnsetConfig::default(),
            tempo: TempoConfig::default(),
            beat: BeatConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a JSON file, falling back to defaults
    ///
    /// Missing or malformed files are not fatal: the tracker should come up
    /// with sane behavior even when the host ships no config.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Validate ranges that would otherwise poison the per-frame math
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.spectrum;
        if s.bins == 0 || s.min_hz <= 0.0 || s.min_hz >= s.max_hz {
            return Err(ConfigError::SpectrumInvalid {
                bins: s.bins,
                min_hz: s.min_hz,
                max_hz: s.max_hz,
            });
        }

        let t = &self.tempo;
        if t.min_bpm <= 0.0 || t.min_bpm >= t.max_bpm {
            return Err(ConfigError::BpmRangeInvalid {
                min: t.min_bpm,
                max: t.max_bpm,
            });
        }
        if t.corr_stride == 0 {
            return Err(ConfigError::ParameterInvalid {
                name: "corr_stride",
                value: t.corr_stride as f32,
            });
        }
        if t.corr_window == 0 || t.history_len == 0 {
            return Err(ConfigError::ParameterInvalid {
                name: "corr_window/history_len",
                value: t.corr_window.min(t.history_len) as f32,
            });
        }

        if self.onset.energy_window == 0 {
            return Err(ConfigError::ParameterInvalid {
                name: "energy_window",
                value: 0.0,
            });
        }
        for band in &self.onset.bands {
            if band.low_hz >= band.high_hz
                || band.low_hz < s.min_hz
                || band.high_hz > s.max_hz
                || band.weight <= 0.0
            {
                return Err(ConfigError::BandRangeInvalid {
                    name: band.name.clone(),
                    low_hz: band.low_hz,
                    high_hz: band.high_hz,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spectrum.bins, 512);
        assert_eq!(config.onset.bands.len(), 3);
        // kick weighted highest, and first so it drives the display signal
        assert_eq!(config.onset.bands[0].name, "kick");
        assert!(config.onset.bands[0].weight >= config.onset.bands[1].weight);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = TrackerConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: TrackerConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.tempo.min_bpm, config.tempo.min_bpm);
        assert_eq!(parsed.onset.bands.len(), config.onset.bands.len());
        assert_eq!(parsed.beat.phase_window, config.beat.phase_window);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = TrackerConfig::load_from_file("/nonexistent/beatsense.json");
        assert_eq!(config.spectrum.bins, TrackerConfig::default().spectrum.bins);
    }

    #[test]
    fn test_validation_rejects_inverted_bpm_range() {
        let mut config = TrackerConfig::default();
        config.tempo.min_bpm = 200.0;
        assert!(matches!(
            config.validate(),
            Err(crate::error::ConfigError::BpmRangeInvalid { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_band_outside_spectrum() {
        let mut config = TrackerConfig::default();
        config.onset.bands[2].high_hz = 30000.0;
        assert!(matches!(
            config.validate(),
            Err(crate::error::ConfigError::BandRangeInvalid { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_stride() {
        let mut config = TrackerConfig::default();
        config.tempo.corr_stride = 0;
        assert!(config.validate().is_err());
    }
}
