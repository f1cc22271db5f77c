//! Time representation for the decode pipeline.
//! All pipeline timestamps are microseconds (i64); stream timestamps are ticks
//! of a per-stream rational time-base.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Time in microseconds.
/// This is the unit of every timestamp the pipeline hands to callers.
pub type Time = i64;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Rational number used for stream time-bases (e.g. 1/90000 for MPEG-TS).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// Time-base of pipeline output timestamps.
    pub const MICROSECONDS: Rational = Rational { num: 1, den: 1_000_000 };

    #[inline]
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// A zero denominator marks an unknown time-base.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.den != 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert stream ticks to microseconds: ticks * num / den * 1e6.
/// Returns 0 for an unknown time-base.
pub fn ticks_to_micros(ticks: i64, time_base: Rational) -> Time {
    if time_base.den == 0 {
        return 0;
    }
    // i128: 90kHz ticks of a long stream overflow i64 once scaled
    let result =
        (ticks as i128 * time_base.num as i128 * MICROS_PER_SECOND as i128) / time_base.den as i128;
    result as Time
}

/// Duration of `samples` samples at `sample_rate`, in microseconds.
#[inline]
pub fn samples_to_micros(samples: i64, sample_rate: i64) -> Time {
    if sample_rate <= 0 {
        return 0;
    }
    (samples as f64 * MICROS_PER_SECOND as f64 / sample_rate as f64) as Time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_micros() {
        // 90kHz MPEG-TS clock
        assert_eq!(ticks_to_micros(90_000, Rational::new(1, 90_000)), 1_000_000);
        // 48kHz audio sample clock
        assert_eq!(ticks_to_micros(1024, Rational::new(1, 48_000)), 21_333);
        // Unknown time-base
        assert_eq!(ticks_to_micros(1024, Rational::new(1, 0)), 0);
    }

    #[test]
    fn test_samples_to_micros() {
        assert_eq!(samples_to_micros(1024, 16_000), 64_000);
        assert_eq!(samples_to_micros(44_100, 44_100), 1_000_000);
        assert_eq!(samples_to_micros(1024, 0), 0);
    }

    #[test]
    fn test_rational() {
        let tb = Rational::new(1, 1000);
        assert!(tb.is_valid());
        assert_eq!(format!("{}", tb), "1/1000");
        assert_eq!(format!("{:?}", Rational::MICROSECONDS), "1/1000000");
        assert!(!Rational::new(1, 0).is_valid());
    }
}
