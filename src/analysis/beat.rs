//! Phase-locked beat clock.
//!
//! Tracks position inside the current beat cycle as a phase in [0, 1) and
//! decides, once per frame, whether a beat occurred. Two trigger paths:
//! a purely predicted beat when the elapsed time reaches the interval, and
//! an onset-confirmed beat when a strong hit lands inside the wrapped-phase
//! window around 0. A confirmed beat pulls the clock toward the detected
//! onset with a proportional correction instead of snapping.

use crate::config::BeatConfig;

/// Outcome of one frame's beat decision
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BeatDecision {
    pub beat: bool,
    pub downbeat: bool,
}

pub(crate) struct BeatClock {
    cfg: BeatConfig,
    last_beat_ms: Option<f64>,
    interval_ms: f32,
    phase: f32,
    beat_count: u64,
    /// Position inside the 4-beat bar approximation
    bar_position: u8,
    last_tap_ms: Option<f64>,
    tap_intervals: Vec<f32>,
}

impl BeatClock {
    pub fn new(cfg: BeatConfig) -> Self {
        Self {
            cfg,
            last_beat_ms: None,
            interval_ms: 500.0,
            phase: 0.0,
            beat_count: 0,
            bar_position: 0,
            last_tap_ms: None,
            tap_intervals: Vec::new(),
        }
    }

    /// Adopt the estimator's current beat interval.
    pub fn set_interval(&mut self, interval_ms: f32) {
        if interval_ms > 0.0 {
            self.interval_ms = interval_ms;
        }
    }

    /// Advance the phase and decide whether a beat occurred this frame.
    ///
    /// At most one beat fires per frame. When both trigger paths are
    /// eligible the onset-confirmed path wins, because it carries phase
    /// information the prediction lacks; a confirmed beat additionally
    /// requires at least half an interval since the previous beat so a
    /// fresh beat cannot immediately retrigger inside the window.
    pub fn process(&mut self, now_ms: f64, onset: f32, kick: f32) -> BeatDecision {
        let last = match self.last_beat_ms {
            Some(t) => t,
            None => {
                // first frame anchors the clock, no beat yet
                self.last_beat_ms = Some(now_ms);
                self.phase = 0.0;
                return BeatDecision::default();
            }
        };

        let interval = f64::from(self.interval_ms);
        if interval <= 0.0 {
            return BeatDecision::default();
        }

        let elapsed = (now_ms - last).max(0.0);
        self.phase = ((elapsed % interval) / interval) as f32;

        let predicted = elapsed >= interval;

        let w = self.cfg.phase_window;
        let in_window = self.phase < w || self.phase > 1.0 - w;
        let strong = onset >= self.cfg.trigger_floor || kick >= self.cfg.trigger_floor;
        let confirmed = in_window && strong && elapsed >= interval * 0.5;

        if confirmed {
            // signed error of the onset against the nearest grid instant:
            // positive when late, negative when early
            let err = if self.phase < 0.5 {
                f64::from(self.phase) * interval
            } else {
                (f64::from(self.phase) - 1.0) * interval
            };
            // proportional pull toward the onset, not a snap
            let keep = 1.0 - f64::from(self.cfg.correction_gain);
            self.last_beat_ms = Some(now_ms - keep * err);
            self.phase = 0.0;
            return self.accept();
        }

        if predicted {
            self.last_beat_ms = Some(now_ms);
            self.phase = 0.0;
            return self.accept();
        }

        BeatDecision::default()
    }

    fn accept(&mut self) -> BeatDecision {
        self.beat_count += 1;
        self.bar_position += 1;
        let downbeat = self.bar_position >= 4;
        if downbeat {
            self.bar_position = 0;
        }
        BeatDecision {
            beat: true,
            downbeat,
        }
    }

    /// Register a manual tap. Returns the averaged BPM once at least one
    /// plausible inter-tap interval exists.
    ///
    /// Intervals outside the plausible BPM range restart the sequence, so
    /// a stale tap from minutes ago cannot skew the average.
    pub fn tap(&mut self, now_ms: f64) -> Option<f32> {
        let mut result = None;

        if let Some(prev) = self.last_tap_ms {
            let dt = (now_ms - prev) as f32;
            let bpm = 60_000.0 / dt;
            if bpm >= self.cfg.tap_min_bpm && bpm <= self.cfg.tap_max_bpm {
                self.tap_intervals.push(dt);
                if self.tap_intervals.len() > self.cfg.tap_window {
                    self.tap_intervals.remove(0);
                }
                let avg: f32 =
                    self.tap_intervals.iter().sum::<f32>() / self.tap_intervals.len() as f32;
                self.interval_ms = avg;
                // the tap itself is the beat; re-anchor the clock on it
                self.last_beat_ms = Some(now_ms);
                self.phase = 0.0;
                result = Some(60_000.0 / avg);
            } else {
                self.tap_intervals.clear();
            }
        }

        self.last_tap_ms = Some(now_ms);
        result
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn reset(&mut self) {
        self.last_beat_ms = None;
        self.interval_ms = 500.0;
        self.phase = 0.0;
        self.beat_count = 0;
        self.bar_position = 0;
        self.last_tap_ms = None;
        self.tap_intervals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeatConfig;

    fn clock() -> BeatClock {
        BeatClock::new(BeatConfig::default())
    }

    #[test]
    fn test_phase_advances_monotonically_between_beats() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0); // anchor

        let mut prev_phase = 0.0f32;
        let mut t = 0.0;
        for _ in 0..24 {
            t += 20.0;
            let decision = bc.process(t, 0.0, 0.0);
            if decision.beat {
                prev_phase = 0.0;
                continue;
            }
            assert!(
                bc.phase() >= prev_phase,
                "phase went backwards without a beat: {} -> {}",
                prev_phase,
                bc.phase()
            );
            prev_phase = bc.phase();
        }
    }

    #[test]
    fn test_predicted_beat_fires_at_interval() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);

        let mut beats = 0;
        let mut t = 0.0;
        for _ in 0..100 {
            t += 20.0;
            if bc.process(t, 0.0, 0.0).beat {
                beats += 1;
            }
        }
        // 2 seconds at 500ms interval: four predicted beats
        assert_eq!(beats, 4);
        assert_eq!(bc.beat_count(), 4);
    }

    #[test]
    fn test_at_most_one_beat_per_frame() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);
        // elapsed past the interval AND a strong onset in the window:
        // both paths eligible, exactly one beat fires
        let decision = bc.process(510.0, 0.9, 0.9);
        assert!(decision.beat);
        assert_eq!(bc.beat_count(), 1);
    }

    #[test]
    fn test_confirmed_beat_pulls_clock() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);

        // strong onset slightly early (phase ~0.92)
        let decision = bc.process(460.0, 0.9, 0.0);
        assert!(decision.beat, "early onset inside the window must confirm");

        // the clock was pulled only partially toward the onset: the next
        // predicted beat lands between the onset-derived and grid-derived
        // instants
        let next = bc.process(460.0 + 530.0, 0.0, 0.0);
        assert!(next.beat);
    }

    #[test]
    fn test_fresh_beat_does_not_retrigger_in_window() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);
        assert!(bc.process(500.0, 0.9, 0.9).beat);
        // a frame later we are inside the wrapped window with a strong
        // onset, but only half-interval separation could confirm again
        assert!(!bc.process(520.0, 0.9, 0.9).beat);
        assert_eq!(bc.beat_count(), 1);
    }

    #[test]
    fn test_weak_onset_does_not_confirm() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);
        let decision = bc.process(460.0, 0.1, 0.05);
        assert!(!decision.beat);
    }

    #[test]
    fn test_downbeat_every_fourth_beat() {
        let mut bc = clock();
        bc.set_interval(500.0);
        bc.process(0.0, 0.0, 0.0);

        let mut downbeats = Vec::new();
        let mut t = 0.0;
        for _ in 0..500 {
            t += 20.0;
            let decision = bc.process(t, 0.0, 0.0);
            if decision.beat {
                downbeats.push(decision.downbeat);
            }
        }
        assert!(downbeats.len() >= 8);
        for (i, &down) in downbeats.iter().enumerate() {
            assert_eq!(down, (i + 1) % 4 == 0, "beat {} downbeat flag wrong", i);
        }
    }

    #[test]
    fn test_two_taps_500ms_apart_give_120_bpm() {
        let mut bc = clock();
        assert_eq!(bc.tap(1_000.0), None);
        let bpm = bc.tap(1_500.0).expect("second tap must produce a BPM");
        assert!((bpm - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_implausible_tap_gap_restarts_sequence() {
        let mut bc = clock();
        bc.tap(0.0);
        bc.tap(500.0);
        // 10 seconds of nothing, then a new pair
        assert_eq!(bc.tap(10_500.0), None);
        let bpm = bc.tap(11_000.0).expect("new pair should produce a BPM");
        assert!((bpm - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut bc = clock();
        bc.process(0.0, 0.0, 0.0);
        bc.process(600.0, 0.0, 0.0);
        assert_eq!(bc.beat_count(), 1);
        bc.reset();
        assert_eq!(bc.beat_count(), 0);
        assert_eq!(bc.phase(), 0.0);
    }
}
