// beatsense_sim - drive the tracker with a synthetic spectrum
//
// Generates an impulse-train spectrum at a chosen tempo and feeds it
// through the full pipeline on a manual timeline, printing tracker state
// once per second. Useful for eyeballing convergence behavior without an
// audio host.

use anyhow::Result;
use clap::Parser;

use beatsense::analysis::bin_for_frequency;
use beatsense::{BeatTracker, ManualClock, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "beatsense_sim", about = "Synthetic-input tracker simulator")]
struct Args {
    /// Tempo of the synthetic kick pattern
    #[arg(long, default_value_t = 128.0)]
    bpm: f64,

    /// Simulated duration in seconds
    #[arg(long, default_value_t = 20.0)]
    seconds: f64,

    /// Simulated frame rate in Hz
    #[arg(long, default_value_t = 60.0)]
    fps: f64,

    /// Optional JSON config file
    #[arg(long)]
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load_from_file(path),
        None => TrackerConfig::default(),
    };
    let clock = ManualClock::new();
    let mut tracker = BeatTracker::with_time_source(config.clone(), Box::new(clock.clone()))?;

    let kick_lo = bin_for_frequency(config.onset.bands[0].low_hz, &config.spectrum);
    let kick_hi = bin_for_frequency(config.onset.bands[0].high_hz, &config.spectrum);

    let frame_ms = 1000.0 / args.fps;
    let beat_ms = 60_000.0 / args.bpm;
    let total_frames = (args.seconds * args.fps) as u64;

    let mut next_kick_ms = 0.0f64;
    let mut next_print_ms = 1000.0f64;
    let mut beats_seen = 0u64;

    for frame in 0..total_frames {
        let now = frame as f64 * frame_ms;
        clock.set_ms(now);

        let mut spectrum = vec![0.0f32; config.spectrum.bins];
        if now + frame_ms * 0.5 >= next_kick_ms {
            for bin in kick_lo..=kick_hi {
                spectrum[bin] = 0.9;
            }
            next_kick_ms += beat_ms;
        }

        let report = tracker.process(&spectrum);
        if report.beat {
            beats_seen += 1;
        }

        if now >= next_print_ms {
            println!(
                "t={:5.1}s bpm={:3} conf={:.2} beats={} phase={:.2} lock={:?}",
                now / 1000.0,
                report.bpm,
                report.confidence,
                beats_seen,
                report.beat_phase,
                tracker.lock_state()
            );
            next_print_ms += 1000.0;
        }
    }

    println!(
        "final: target {:.1} BPM, tracked {} BPM, confidence {:.2}",
        args.bpm,
        tracker.bpm().round(),
        tracker.confidence()
    );
    Ok(())
}
