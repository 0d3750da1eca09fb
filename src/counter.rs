//! Counters: named numeric time series
//!
//! A `Counter` owns one or more `CounterSeries`. Each series keeps its
//! timestamps and samples as parallel vectors for cache locality; both are
//! private, so a sample can only be added through `add_sample`, which pushes
//! to both or to neither.

use crate::color::color_id_for;
use crate::error::{ModelError, OrderingKind, Result};
use crate::range::Range;
use crate::timestamp::Timestamp;
use serde::Serialize;

/// Summary of a subset of samples in one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleStatistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Sample at the first supplied index
    pub start: f64,
    /// Sample at the last supplied index
    pub end: f64,
}

/// One named series of (timestamp, value) samples
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSeries {
    name: String,
    color: u32,
    timestamps: Vec<Timestamp>,
    samples: Vec<f64>,
}

impl CounterSeries {
    /// Create an empty series; its color is derived from the name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let color = color_id_for(&name);
        Self::with_color(name, color)
    }

    pub fn with_color(name: impl Into<String>, color: u32) -> Self {
        CounterSeries {
            name: name.into(),
            color,
            timestamps: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Sample `index` as a (timestamp, value) pair
    pub fn sample(&self, index: usize) -> Option<(Timestamp, f64)> {
        Some((*self.timestamps.get(index)?, *self.samples.get(index)?))
    }

    /// Append a sample; timestamps must be strictly increasing
    pub fn add_sample(&mut self, ts: Timestamp, value: f64) -> Result<()> {
        if let Some(&previous_ts) = self.timestamps.last() {
            if ts <= previous_ts {
                return Err(ModelError::ordering(
                    format!("counter series {}", self.name),
                    ts,
                    OrderingKind::NonMonotonicSample { previous_ts },
                ));
            }
        }
        self.timestamps.push(ts);
        self.samples.push(value);
        Ok(())
    }

    /// Statistics over an arbitrary subset of sample indices
    ///
    /// Indices may be unsorted and may repeat; runs in O(k). Returns `None`
    /// for an empty subset.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds, like slice indexing.
    pub fn get_statistics(&self, indices: &[usize]) -> Option<SampleStatistics> {
        let (&first, &last) = (indices.first()?, indices.last()?);

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &index in indices {
            let value = self.samples[index];
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        Some(SampleStatistics {
            min,
            max,
            avg: sum / indices.len() as f64,
            start: self.samples[first],
            end: self.samples[last],
        })
    }

    /// Add `amount` nanoseconds to every timestamp
    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for ts in &mut self.timestamps {
            *ts = ts.shifted(amount);
        }
    }
}

/// Named counter made of one or more series
#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    category: String,
    name: String,
    series: Vec<CounterSeries>,
    bounds: Range,
}

impl Counter {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Counter {
            category: category.into(),
            name: name.into(),
            series: Vec::new(),
            bounds: Range::new(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `category.name`, the key counters are stored under
    pub fn id(&self) -> String {
        counter_key(&self.category, &self.name)
    }

    pub fn series(&self) -> &[CounterSeries] {
        &self.series
    }

    pub fn num_series(&self) -> usize {
        self.series.len()
    }

    /// Length of the longest series
    pub fn num_samples(&self) -> usize {
        self.series.iter().map(CounterSeries::len).max().unwrap_or(0)
    }

    /// Timestamps of the first series; every series shares the same domain
    pub fn timestamps(&self) -> &[Timestamp] {
        self.series
            .first()
            .map(CounterSeries::timestamps)
            .unwrap_or(&[])
    }

    pub fn add_series(&mut self, series: CounterSeries) -> &mut CounterSeries {
        let index = self.series.len();
        self.series.push(series);
        &mut self.series[index]
    }

    pub fn series_named(&self, name: &str) -> Option<&CounterSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Look a series up by name, creating it when absent
    pub fn get_or_add_series(&mut self, name: &str) -> &mut CounterSeries {
        match self.series.iter().position(|s| s.name == name) {
            Some(index) => &mut self.series[index],
            None => self.add_series(CounterSeries::new(name)),
        }
    }

    /// Sum of every series' sample at `index` (stacked counter height)
    pub fn total_at(&self, index: usize) -> f64 {
        self.series
            .iter()
            .filter_map(|s| s.samples.get(index))
            .sum()
    }

    /// Per-series statistics over the same index subset
    ///
    /// Series for which the subset is empty are skipped.
    pub fn get_sample_statistics(&self, indices: &[usize]) -> Vec<SampleStatistics> {
        self.series
            .iter()
            .filter_map(|s| s.get_statistics(indices))
            .collect()
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for series in &mut self.series {
            series.shift_timestamps_forward(amount);
        }
    }

    /// Recompute bounds from the first and last timestamp of each series
    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for series in &self.series {
            if let (Some(&first), Some(&last)) = (series.timestamps.first(), series.timestamps.last()) {
                self.bounds.add_value(first);
                self.bounds.add_value(last);
            }
        }
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }
}

pub(crate) fn counter_key(category: &str, name: &str) -> String {
    if category.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", category, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(nanos: i64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    fn series_with(values: &[f64]) -> CounterSeries {
        let mut series = CounterSeries::new("value");
        for (i, &v) in values.iter().enumerate() {
            series.add_sample(ts(i as i64), v).unwrap();
        }
        series
    }

    // Test 1: Statistics over the full index set
    #[test]
    fn test_statistics_full_set() {
        let series = series_with(&[5.0, 6.0, 5.0, 7.0]);
        let stats = series.get_statistics(&[0, 1, 2, 3]).unwrap();
        assert_eq!(
            stats,
            SampleStatistics {
                min: 5.0,
                max: 7.0,
                avg: 5.75,
                start: 5.0,
                end: 7.0,
            }
        );
    }

    // Test 2: Unsorted and duplicated indices
    #[test]
    fn test_statistics_unsorted_duplicates() {
        let series = series_with(&[1.0, 10.0, 4.0]);
        let stats = series.get_statistics(&[2, 0, 2]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.avg, 3.0);
        assert_eq!(stats.start, 4.0);
        assert_eq!(stats.end, 4.0);
    }

    // Test 3: Empty subset
    #[test]
    fn test_statistics_empty_subset() {
        let series = series_with(&[1.0]);
        assert!(series.get_statistics(&[]).is_none());
    }

    #[test]
    #[should_panic]
    fn test_statistics_out_of_bounds_panics() {
        let series = series_with(&[1.0]);
        let _ = series.get_statistics(&[3]);
    }

    // Test 4: Timestamps must strictly increase, arrays stay in lockstep
    #[test]
    fn test_add_sample_rejects_non_increasing() {
        let mut series = series_with(&[1.0, 2.0]);
        let err = series.add_sample(ts(1), 3.0).unwrap_err();
        assert!(matches!(
            err,
            ModelError::OrderingViolation {
                kind: OrderingKind::NonMonotonicSample { .. },
                ..
            }
        ));
        let err = series.add_sample(ts(0), 3.0).unwrap_err();
        assert_eq!(err.kind_name(), "ordering_violation");
        assert_eq!(series.timestamps().len(), series.samples().len());
        assert_eq!(series.len(), 2);
    }

    // Test 5: Shift is reversible
    #[test]
    fn test_shift_round_trip() {
        let mut counter = Counter::new("mem", "heap");
        counter.add_series(series_with(&[1.0, 2.0, 3.0]));
        let before = counter.clone();
        counter.shift_timestamps_forward(1_000);
        assert_eq!(counter.timestamps()[0], ts(1_000));
        counter.shift_timestamps_forward(-1_000);
        assert_eq!(counter, before);
    }

    // Test 6: Counter level statistics, one per series
    #[test]
    fn test_counter_sample_statistics() {
        let mut counter = Counter::new("mem", "heap");
        counter.add_series(series_with(&[5.0, 6.0, 5.0, 7.0]));
        counter.add_series(series_with(&[1.0, 1.0, 1.0, 1.0]));
        let stats = counter.get_sample_statistics(&[0, 3]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].avg, 6.0);
        assert_eq!(stats[1].max, 1.0);
        assert_eq!(counter.total_at(3), 8.0);
        assert_eq!(counter.num_samples(), 4);
    }

    #[test]
    fn test_get_or_add_series() {
        let mut counter = Counter::new("", "fps");
        counter.get_or_add_series("value").add_sample(ts(1), 60.0).unwrap();
        counter.get_or_add_series("value").add_sample(ts(2), 59.0).unwrap();
        assert_eq!(counter.num_series(), 1);
        assert_eq!(counter.series_named("value").unwrap().len(), 2);
        assert_eq!(counter.id(), "fps");
    }

    #[test]
    fn test_update_bounds() {
        let mut counter = Counter::new("mem", "heap");
        counter.add_series(series_with(&[1.0, 2.0, 3.0]));
        counter.update_bounds();
        assert_eq!(counter.bounds().min(), Some(ts(0)));
        assert_eq!(counter.bounds().max(), Some(ts(2)));
        assert_eq!(counter.id(), "mem.heap");
    }
}
