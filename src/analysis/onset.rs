// OnsetDetector - per-band spectral flux onset detection
//
// This module computes a combined onset strength from three frequency bands
// (kick, snare, hi-hat) using rectified spectral flux plus deviation from a
// running energy mean, with per-band adaptive thresholds.
//
// Two distinct signals leave this stage each frame:
// 1. A thresholded, weighted onset strength used for beat-trigger decisions.
// 2. A raw, unthresholded weighted flux used purely for periodicity
//    analysis. The raw signal must not be gated by the trigger threshold or
//    tempo estimation loses sensitivity to sub-threshold rhythmic energy.

use crate::analysis::bands::Band;
use crate::config::{OnsetConfig, SpectrumConfig};

/// Per-frame output of the onset stage
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OnsetFrame {
    /// Thresholded, weighted onset strength for beat triggering
    pub strength: f32,
    /// Unthresholded weighted flux for the onset history ring
    pub raw_flux: f32,
    /// Kick-band onset magnitude, isolated for beat-strength display
    pub kick: f32,
    /// Total band energy, consumed by silence bookkeeping
    pub total_energy: f32,
}

pub(crate) struct OnsetDetector {
    bands: Vec<Band>,
    mean_margin: f32,
    flux_mix: f32,
    threshold_floor: f32,
    threshold_adapt: f32,
    threshold_decay: f32,
}

impl OnsetDetector {
    pub fn new(cfg: &OnsetConfig, spectrum: &SpectrumConfig) -> Self {
        let bands = cfg
            .bands
            .iter()
            .map(|b| Band::from_config(b, spectrum, cfg.energy_window, cfg.threshold_floor))
            .collect();
        Self {
            bands,
            mean_margin: cfg.mean_margin,
            flux_mix: cfg.flux_mix,
            threshold_floor: cfg.threshold_floor,
            threshold_adapt: cfg.threshold_adapt,
            threshold_decay: cfg.threshold_decay,
        }
    }

    /// Process one spectrum frame.
    ///
    /// Per band: RMS energy over the bin range, O(1) running-mean update,
    /// rectified flux against the previous frame, deviation above the mean
    /// trend, then threshold handling. A triggering band raises its own
    /// threshold so a sustained energy step contributes once per rise, not
    /// once per frame while the threshold decays.
    pub fn process(&mut self, spectrum: &[f32]) -> OnsetFrame {
        let mut out = OnsetFrame::default();

        for (i, band) in self.bands.iter_mut().enumerate() {
            let energy = band.rms(spectrum);
            out.total_energy += energy;

            band.energy_history.push(energy);
            let mean = band.energy_history.mean();

            let flux = (energy - band.prev_energy).max(0.0);
            let deviation = (energy - mean * self.mean_margin).max(0.0);
            let raw = self.flux_mix * flux + (1.0 - self.flux_mix) * deviation;

            if raw > band.threshold {
                out.strength += (raw - band.threshold) * band.weight;
                band.threshold =
                    (band.threshold + raw * self.threshold_adapt).max(self.threshold_floor);
            } else {
                band.threshold = self.threshold_floor
                    + (band.threshold - self.threshold_floor) * self.threshold_decay;
            }

            // periodicity signal stays ungated
            out.raw_flux += flux * band.weight;

            if i == 0 {
                out.kick = raw;
            }

            band.prev_energy = energy;
        }

        out
    }

    /// Instantaneous per-band energies (value of the last processed frame).
    pub fn band_energies<'a>(&'a self) -> impl Iterator<Item = (&'a str, f32, f32)> + 'a {
        self.bands
            .iter()
            .map(|b| (b.name.as_str(), b.prev_energy, b.threshold))
    }

    /// Clear adaptive state; band layout and allocations are kept.
    pub fn reset(&mut self) {
        let floor = self.threshold_floor;
        for band in &mut self.bands {
            band.reset(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bands::bin_for_frequency;
    use crate::config::TrackerConfig;

    fn detector() -> (OnsetDetector, TrackerConfig) {
        let cfg = TrackerConfig::default();
        (OnsetDetector::new(&cfg.onset, &cfg.spectrum), cfg)
    }

    /// Spectrum frame with the kick band filled at `magnitude`.
    fn kick_frame(cfg: &TrackerConfig, magnitude: f32) -> Vec<f32> {
        let mut frame = vec![0.0f32; cfg.spectrum.bins];
        let lo = bin_for_frequency(cfg.onset.bands[0].low_hz, &cfg.spectrum);
        let hi = bin_for_frequency(cfg.onset.bands[0].high_hz, &cfg.spectrum);
        for bin in lo..=hi {
            frame[bin] = magnitude;
        }
        frame
    }

    #[test]
    fn test_silence_produces_no_signal() {
        let (mut det, cfg) = detector();
        let frame = vec![0.0f32; cfg.spectrum.bins];
        for _ in 0..10 {
            let out = det.process(&frame);
            assert_eq!(out.strength, 0.0);
            assert_eq!(out.raw_flux, 0.0);
            assert_eq!(out.total_energy, 0.0);
        }
    }

    #[test]
    fn test_energy_step_triggers_once() {
        let (mut det, cfg) = detector();
        let quiet = kick_frame(&cfg, 0.0);
        let loud = kick_frame(&cfg, 0.8);

        for _ in 0..5 {
            det.process(&quiet);
        }

        // rising edge: one onset contribution
        let rise = det.process(&loud);
        assert!(rise.strength > 0.0, "rise should trigger an onset");

        // sustained plateau: flux is zero, deviation shrinks as the mean
        // catches up, and the raised threshold blocks a retrigger
        for i in 0..10 {
            let hold = det.process(&loud);
            assert_eq!(
                hold.strength, 0.0,
                "sustained step retriggered on frame {}",
                i
            );
        }
    }

    #[test]
    fn test_raw_flux_is_not_gated() {
        let (mut det, cfg) = detector();
        // alternate between two low levels; flux stays below any trigger
        let a = kick_frame(&cfg, 0.010);
        let b = kick_frame(&cfg, 0.018);

        det.process(&a);
        let mut saw_raw = false;
        for _ in 0..12 {
            let up = det.process(&b);
            let down = det.process(&a);
            assert_eq!(up.strength + down.strength, 0.0, "sub-threshold flux triggered");
            if up.raw_flux > 0.0 {
                saw_raw = true;
            }
        }
        assert!(saw_raw, "raw flux must pass through unthresholded");
    }

    #[test]
    fn test_kick_band_isolated_for_display() {
        let (mut det, cfg) = detector();
        let quiet = kick_frame(&cfg, 0.0);
        let loud = kick_frame(&cfg, 0.8);
        for _ in 0..5 {
            det.process(&quiet);
        }
        let out = det.process(&loud);
        assert!(out.kick > 0.0);

        // energy confined to the hi-hat range leaves the kick display at 0
        let mut hat = vec![0.0f32; cfg.spectrum.bins];
        let lo = bin_for_frequency(cfg.onset.bands[2].low_hz, &cfg.spectrum);
        let hi = bin_for_frequency(cfg.onset.bands[2].high_hz, &cfg.spectrum);
        for bin in lo..=hi {
            hat[bin] = 0.8;
        }
        det.reset();
        for _ in 0..5 {
            det.process(&vec![0.0; cfg.spectrum.bins]);
        }
        let out = det.process(&hat);
        assert_eq!(out.kick, 0.0);
        assert!(out.strength > 0.0, "hi-hat band should still trigger");
    }

    #[test]
    fn test_reset_clears_adaptation() {
        let (mut det, cfg) = detector();
        let loud = kick_frame(&cfg, 0.8);
        let quiet = kick_frame(&cfg, 0.0);
        for _ in 0..5 {
            det.process(&quiet);
        }
        let first = det.process(&loud);
        det.reset();
        for _ in 0..5 {
            det.process(&quiet);
        }
        let again = det.process(&loud);
        assert!(
            (first.strength - again.strength).abs() < 1e-6,
            "reset left residual threshold state"
        );
    }
}
