//! Core types shared across the pipeline.
//!
//! All pipeline timestamps are microseconds (i64); stream-native timestamps
//! are ticks of a rational time-base.

pub mod time;

pub use time::{Rational, Time};
