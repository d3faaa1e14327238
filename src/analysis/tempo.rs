//! Tempo estimation over the onset history ring.
//!
//! The estimator is timer-gated: the autocorrelation scan costs
//! O(lag-range x window / stride) and runs at most once per configured
//! wall-clock interval, not every frame. Between scans the published BPM,
//! interval, and confidence stay fixed.
//!
//! Pipeline per scan: BPM range -> lag range (via the measured average
//! frame time), normalized autocorrelation per lag with a soft preference
//! for musically common tempos, octave folding against the current
//! estimate, median filtering over a bounded history, then the confidence
//! model with asymmetric smoothing and lock hysteresis.

use crate::config::TempoConfig;
use crate::ring::RingBuffer;

/// Lock hysteresis state machine.
///
/// Crossing the lock-confidence threshold anchors the current estimate as
/// provisional. The streak grows while estimates stay within tolerance of
/// the anchor and decays by a larger step on deviation; surviving long
/// enough promotes the anchor to locked, exhaustion demotes to unlocked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LockState {
    Unlocked,
    Provisional { bpm: f32, streak: u32 },
    Locked { bpm: f32, streak: u32 },
}

/// Agreement streak needed to promote a provisional anchor.
const LOCK_PROMOTE_STREAK: u32 = 4;
/// Deviation costs this many streak steps; agreement earns one.
const LOCK_DECAY_STEP: u32 = 2;
/// Upper bound on the streak so the bonus saturates.
const LOCK_STREAK_CAP: u32 = 64;

pub(crate) struct TempoEstimator {
    cfg: TempoConfig,
    bpm: f32,
    interval_ms: f32,
    history: Vec<f32>,
    raw_confidence: f32,
    confidence: f32,
    lock: LockState,
    last_update_ms: f64,
    frame_times: RingBuffer,
    last_frame_ms: Option<f64>,
    idle: bool,
}

impl TempoEstimator {
    pub fn new(cfg: TempoConfig) -> Self {
        let bpm = cfg.idle_bpm.clamp(cfg.min_bpm, cfg.max_bpm);
        Self {
            interval_ms: 60_000.0 / bpm,
            bpm,
            history: Vec::with_capacity(cfg.history_len),
            raw_confidence: 0.0,
            confidence: 0.0,
            lock: LockState::Unlocked,
            last_update_ms: 0.0,
            frame_times: RingBuffer::new(30),
            last_frame_ms: None,
            cfg,
            idle: false,
        }
    }

    /// Record a frame arrival so the average inter-frame time stays correct
    /// under a variable frame rate.
    pub fn note_frame(&mut self, now_ms: f64) {
        if let Some(last) = self.last_frame_ms {
            let dt = now_ms - last;
            if dt > 0.0 && dt < 250.0 {
                self.frame_times.push(dt as f32);
            }
        }
        self.last_frame_ms = Some(now_ms);
    }

    /// Run an estimation cycle if enough wall-clock time has elapsed.
    pub fn maybe_update(&mut self, now_ms: f64, onsets: &RingBuffer) {
        if now_ms - self.last_update_ms < self.cfg.update_interval_ms {
            return;
        }
        self.last_update_ms = now_ms;
        self.update(onsets);
    }

    fn update(&mut self, onsets: &RingBuffer) {
        let frame_ms = self.frame_times.mean();
        if frame_ms <= 0.0 {
            // no measured timing yet (first ever frame); skip the cycle
            return;
        }
        if onsets.len() < self.cfg.corr_window / 4 {
            // startup: nothing to correlate against
            self.apply_confidence(0.0);
            return;
        }

        let min_lag = ((60_000.0 / (self.cfg.max_bpm * frame_ms)).round() as usize).max(2);
        let max_lag = ((60_000.0 / (self.cfg.min_bpm * frame_ms)).round() as usize)
            .min(onsets.capacity().saturating_sub(self.cfg.corr_window));
        if max_lag <= min_lag {
            return;
        }

        let mut best_lag = 0usize;
        let mut best_score = 0.0f32;
        let mut best_corr = 0.0f32;
        for lag in min_lag..=max_lag {
            let corr = normalized_autocorr(onsets, lag, self.cfg.corr_window, self.cfg.corr_stride);
            let bpm = 60_000.0 / (lag as f32 * frame_ms);
            let score = if bpm >= self.cfg.preferred_low_bpm && bpm <= self.cfg.preferred_high_bpm {
                corr * self.cfg.preferred_boost
            } else {
                corr
            };
            if score > best_score {
                best_score = score;
                best_corr = corr;
                best_lag = lag;
            }
        }

        if best_lag == 0 || best_corr < self.cfg.corr_floor {
            // no reliable periodicity this cycle; leave state unchanged
            return;
        }

        let mut bpm = 60_000.0 / (best_lag as f32 * frame_ms);
        bpm = self.fold_octave(bpm);
        bpm = bpm.clamp(self.cfg.min_bpm, self.cfg.max_bpm);

        self.history.push(bpm);
        if self.history.len() > self.cfg.history_len {
            self.history.remove(0);
        }
        let median = median(&self.history);

        self.bpm = median;
        self.interval_ms = 60_000.0 / median;
        self.idle = false;

        self.step_lock(median);

        let raw = self.raw_confidence_target(best_corr, median);
        self.raw_confidence = raw;
        self.apply_confidence(raw);

        log::debug!(
            "[TempoEstimator] lag {} -> {:.1} BPM (median {:.1}, corr {:.2}, conf {:.2}, {:?})",
            best_lag,
            bpm,
            median,
            best_corr,
            self.confidence,
            self.lock
        );
    }

    /// Fold a doubled or halved reading back toward the current estimate.
    ///
    /// Autocorrelation is octave-ambiguous; a fresh reading at ~2x or ~0.5x
    /// the current tempo is treated as the same tempo misread an octave
    /// off, not as a genuine change.
    fn fold_octave(&self, bpm: f32) -> f32 {
        let current = self.bpm;
        if current <= 0.0 {
            return bpm;
        }
        let tol = self.cfg.octave_tolerance;
        let doubled = current * 2.0;
        let halved = current * 0.5;
        if (bpm - doubled).abs() <= doubled * tol {
            bpm * 0.5
        } else if (bpm - halved).abs() <= halved * tol {
            bpm * 2.0
        } else {
            bpm
        }
    }

    /// Combined confidence target: correlation strength, tempo stability,
    /// history depth, plus the lock-streak bonus.
    fn raw_confidence_target(&self, corr: f32, median: f32) -> f32 {
        let corr_factor = corr.clamp(0.0, 1.0);

        let mut stability = 0.0f32;
        if !self.history.is_empty() && median > 0.0 {
            for &h in &self.history {
                let rel = (h - median).abs() / median;
                if rel < 0.15 {
                    stability += 1.0 - rel / 0.15;
                }
            }
            stability /= self.history.len() as f32;
        }

        let depth = (self.history.len() as f32 / 5.0).min(1.0);

        let bonus = match self.lock {
            LockState::Locked { streak, .. } => (streak as f32 * 0.01).min(0.1),
            _ => 0.0,
        };

        (0.35 * corr_factor + 0.40 * stability + 0.25 * depth + bonus).clamp(0.0, 1.0)
    }

    /// Asymmetric low-pass toward the target: rises fast, falls slow, and
    /// falls slower still while locked.
    fn apply_confidence(&mut self, target: f32) {
        if target > self.confidence {
            self.confidence += (target - self.confidence) * self.cfg.confidence_rise;
        } else {
            let mut fall = self.cfg.confidence_fall;
            if matches!(self.lock, LockState::Locked { .. }) {
                fall *= 0.5;
            }
            self.confidence += (target - self.confidence) * fall;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }

    fn step_lock(&mut self, estimate: f32) {
        let tol = self.cfg.lock_tolerance;
        let within = |anchor: f32| (estimate - anchor).abs() <= anchor * tol;

        self.lock = match self.lock {
            LockState::Unlocked => {
                if self.confidence >= self.cfg.lock_confidence {
                    LockState::Provisional {
                        bpm: estimate,
                        streak: 1,
                    }
                } else {
                    LockState::Unlocked
                }
            }
            LockState::Provisional { bpm, streak } => {
                if within(bpm) {
                    let streak = (streak + 1).min(LOCK_STREAK_CAP);
                    if streak >= LOCK_PROMOTE_STREAK {
                        log::debug!("[TempoEstimator] locked at {:.1} BPM", bpm);
                        LockState::Locked { bpm, streak }
                    } else {
                        LockState::Provisional { bpm, streak }
                    }
                } else if streak > LOCK_DECAY_STEP {
                    LockState::Provisional {
                        bpm,
                        streak: streak - LOCK_DECAY_STEP,
                    }
                } else {
                    LockState::Unlocked
                }
            }
            LockState::Locked { bpm, streak } => {
                if within(bpm) {
                    LockState::Locked {
                        bpm,
                        streak: (streak + 1).min(LOCK_STREAK_CAP),
                    }
                } else if streak > LOCK_DECAY_STEP {
                    LockState::Locked {
                        bpm,
                        streak: streak - LOCK_DECAY_STEP,
                    }
                } else {
                    log::debug!("[TempoEstimator] lock lost at {:.1} BPM", bpm);
                    LockState::Unlocked
                }
            }
        };
    }

    /// Manual tempo override from the tap path. Bypasses autocorrelation:
    /// the history restarts at the tapped value so the median follows
    /// immediately, and confidence jumps to a usable level.
    pub fn apply_manual(&mut self, bpm: f32) {
        let bpm = bpm.clamp(self.cfg.min_bpm, self.cfg.max_bpm);
        self.bpm = bpm;
        self.interval_ms = 60_000.0 / bpm;
        self.history.clear();
        self.history.push(bpm);
        self.raw_confidence = self.raw_confidence.max(0.6);
        self.confidence = self.confidence.max(0.6);
        self.idle = false;
        log::debug!("[TempoEstimator] manual tempo {:.1} BPM", bpm);
    }

    /// Drop to the idle baseline after sustained silence. Band calibration
    /// lives in the onset detector and is deliberately untouched.
    pub fn reset_to_idle(&mut self) {
        self.bpm = self.cfg.idle_bpm.clamp(self.cfg.min_bpm, self.cfg.max_bpm);
        self.interval_ms = 60_000.0 / self.bpm;
        self.history.clear();
        self.raw_confidence = 0.0;
        self.confidence = 0.0;
        self.lock = LockState::Unlocked;
        self.idle = true;
        log::info!("[TempoEstimator] sustained silence, idling at {:.0} BPM", self.bpm);
    }

    /// First energy after an idle period clears the idle bookkeeping; the
    /// neutral default BPM is already in place.
    pub fn exit_idle(&mut self) {
        if self.idle {
            self.idle = false;
            log::debug!("[TempoEstimator] signal returned, leaving idle");
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Full reset, including frame timing.
    pub fn reset(&mut self) {
        self.reset_to_idle();
        self.idle = false;
        self.last_update_ms = 0.0;
        self.frame_times.clear();
        self.last_frame_ms = None;
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn interval_ms(&self) -> f32 {
        self.interval_ms
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Unsmoothed confidence target from the last estimation cycle.
    pub fn raw_confidence(&self) -> f32 {
        self.raw_confidence
    }

    pub fn lock_state(&self) -> LockState {
        self.lock
    }
}

/// Normalized autocorrelation of the ring against itself at `lag`,
/// restricted to a bounded recent window with a sampling stride so the
/// cost stays constant regardless of history depth.
fn normalized_autocorr(ring: &RingBuffer, lag: usize, window: usize, stride: usize) -> f32 {
    let span = window.min(ring.capacity().saturating_sub(lag));
    let mut dot = 0.0f64;
    let mut e0 = 0.0f64;
    let mut e1 = 0.0f64;
    let mut k = 0;
    while k < span {
        let a = f64::from(ring.recent(k));
        let b = f64::from(ring.recent(k + lag));
        dot += a * b;
        e0 += a * a;
        e1 += b * b;
        k += stride;
    }
    let denom = (e0 * e1).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        (dot / denom) as f32
    }
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
