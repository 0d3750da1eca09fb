//! Nanosecond timestamps with an explicit "+infinity"
//!
//! Every timestamp in the model is a signed count of nanoseconds. Signed,
//! because shifting the world to zero moves earlier captures below the
//! origin. `Timestamp::INFINITY` is the value of an instance that was never
//! deleted and of a snapshot that was never superseded; it is a regular,
//! totally ordered value and compares greater than every finite timestamp.
//!
//! Integer storage keeps `shifted(d).shifted(-d)` exact, which a floating
//! point representation cannot promise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point in trace time, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Open end of an interval (never deleted, never superseded)
    pub const INFINITY: Timestamp = Timestamp(i64::MAX);

    /// Trace origin
    pub const ZERO: Timestamp = Timestamp(0);

    /// Largest finite timestamp
    pub const MAX_FINITE: Timestamp = Timestamp(i64::MAX - 1);

    /// Create a timestamp from nanoseconds
    ///
    /// `i64::MAX` is `INFINITY`.
    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    /// Create a timestamp from microseconds (the unit trace events carry)
    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(clamp_finite(micros.saturating_mul(1_000)))
    }

    /// Create a timestamp from milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(clamp_finite(millis.saturating_mul(1_000_000)))
    }

    /// Raw nanosecond value
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Milliseconds as a float, for display
    pub fn as_millis_f64(self) -> f64 {
        if self.is_finite() {
            self.0 as f64 / 1_000_000.0
        } else {
            f64::INFINITY
        }
    }

    /// False only for `INFINITY`
    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX
    }

    /// Shift by a signed number of nanoseconds
    ///
    /// `INFINITY` stays `INFINITY`. Finite values saturate inside the finite
    /// range, so a shift can never turn a closed interval into an open one.
    pub const fn shifted(self, amount: i64) -> Self {
        if !self.is_finite() {
            return self;
        }
        Timestamp(clamp_finite(self.0.saturating_add(amount)))
    }

    /// Add an unsigned duration (slice ends)
    pub fn saturating_add_nanos(self, nanos: u64) -> Self {
        if !self.is_finite() {
            return self;
        }
        let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
        self.shifted(nanos)
    }

    /// Nanoseconds elapsed since `earlier`, zero if `earlier` is later
    pub fn nanos_since(self, earlier: Timestamp) -> u64 {
        if self <= earlier {
            return 0;
        }
        (self.0 as i128 - earlier.0 as i128).min(u64::MAX as i128) as u64
    }
}

const fn clamp_finite(nanos: i64) -> i64 {
    if nanos == i64::MAX {
        i64::MAX - 1
    } else {
        nanos
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_finite() {
            write!(f, "{}ns", self.0)
        } else {
            write!(f, "+inf")
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::ZERO
    }
}
