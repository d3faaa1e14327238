// Error types for tracker construction
//
// The per-frame path never returns errors: degenerate numeric cases clamp,
// early-return with unchanged state, or read as "no signal". Validation only
// happens once, when a tracker is built from an explicit configuration.

use std::fmt;

/// Configuration validation errors
///
/// Returned by `TrackerConfig::validate()` and the tracker constructors that
/// accept an explicit configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Tempo range is empty or non-positive
    BpmRangeInvalid { min: f32, max: f32 },

    /// A band's frequency range is empty or outside the spectrum bounds
    BandRangeInvalid {
        name: String,
        low_hz: f32,
        high_hz: f32,
    },

    /// Spectrum descriptor is unusable (zero bins or inverted Hz bounds)
    SpectrumInvalid {
        bins: usize,
        min_hz: f32,
        max_hz: f32,
    },

    /// A smoothing or windowing parameter is outside its sane range
    ParameterInvalid { name: &'static str, value: f32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BpmRangeInvalid { min, max } => {
                write!(f, "tempo range [{}, {}] BPM is invalid", min, max)
            }
            ConfigError::BandRangeInvalid {
                name,
                low_hz,
                high_hz,
            } => {
                write!(
                    f,
                    "band '{}' frequency range [{} Hz, {} Hz] is invalid",
                    name, low_hz, high_hz
                )
            }
            ConfigError::SpectrumInvalid { bins, min_hz, max_hz } => {
                write!(
                    f,
                    "spectrum descriptor invalid: {} bins over [{} Hz, {} Hz]",
                    bins, min_hz, max_hz
                )
            }
            ConfigError::ParameterInvalid { name, value } => {
                write!(f, "parameter '{}' has invalid value {}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
