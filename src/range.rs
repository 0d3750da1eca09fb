//! Min/max accumulator used for every bounds computation
//!
//! A `Range` only ever widens. Owners keep their own `Range` and fold their
//! children's values into it; ranges are copied, never shared.
//!
//! For `Range<f64>` no NaN handling is done: a NaN first value leaves both
//! ends NaN (every later comparison is false), and a NaN added to a non-empty
//! range is ignored.

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Closed interval `[min, max]`, or empty
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range<T = Timestamp> {
    min: Option<T>,
    max: Option<T>,
}

impl<T> Default for Range<T> {
    fn default() -> Self {
        Range {
            min: None,
            max: None,
        }
    }
}

impl<T: Copy + PartialOrd> Range<T> {
    /// Create an empty range
    pub const fn new() -> Self {
        Range {
            min: None,
            max: None,
        }
    }

    /// Fold every value of an iterator into a new range
    pub fn from_values<I: IntoIterator<Item = T>>(values: I) -> Self {
        let mut range = Range::new();
        for value in values {
            range.add_value(value);
        }
        range
    }

    /// True when no value has been added since creation or the last reset
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
    }

    pub fn min(&self) -> Option<T> {
        self.min
    }

    pub fn max(&self) -> Option<T> {
        self.max
    }

    /// Widen the range to include `value`
    pub fn add_value(&mut self, value: T) {
        match (self.min, self.max) {
            (Some(min), Some(max)) => {
                if value < min {
                    self.min = Some(value);
                }
                if value > max {
                    self.max = Some(value);
                }
            }
            _ => {
                self.min = Some(value);
                self.max = Some(value);
            }
        }
    }

    /// Widen the range to include another range; empty ranges are ignored
    pub fn add_range(&mut self, other: &Range<T>) {
        if let (Some(min), Some(max)) = (other.min, other.max) {
            self.add_value(min);
            self.add_value(max);
        }
    }

    pub fn reset(&mut self) {
        self.min = None;
        self.max = None;
    }

    /// True when `min <= value <= max`
    pub fn contains(&self, value: T) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= value && value <= max,
            _ => false,
        }
    }
}

impl Range<Timestamp> {
    /// Span of the range in nanoseconds, `None` when empty
    pub fn duration_nanos(&self) -> Option<u64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(max.nanos_since(min)),
            _ => None,
        }
    }

    /// Midpoint of the range, `None` when empty
    pub fn center(&self) -> Option<Timestamp> {
        let min = self.min?;
        let half = self.duration_nanos()? / 2;
        Some(min.saturating_add_nanos(half))
    }
}
