//! Slices: named intervals on a thread or cpu timeline
//!
//! A `SliceGroup` keeps its closed slices ordered by start time. Slices
//! arrive either complete (`push_slice`) or as begin/end pairs
//! (`begin_slice`/`end_slice`) that nest like a call stack:
//!
//! ```text
//! begin A ─┐
//!  begin B ─┼─┐
//!    end B ─┼─┘      closed slices, sorted by start: [A, B]
//!    end A ─┘
//! ```
//!
//! Nesting depth and the child lists are derived afterwards from
//! containment by `create_sub_slices`.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tracemodel::slice::SliceGroup;
//! use tracemodel::timestamp::Timestamp;
//!
//! let mut group = SliceGroup::new();
//! group.begin_slice("toplevel", "MessageLoop::RunTask", Timestamp::from_nanos(0), json!({}));
//! group.begin_slice("cc", "DrawFrame", Timestamp::from_nanos(10), json!({}));
//! group.end_slice(Timestamp::from_nanos(20)).unwrap();
//! group.end_slice(Timestamp::from_nanos(50)).unwrap();
//! group.create_sub_slices();
//!
//! assert_eq!(group.slices()[0].sub_slices, vec![1]);
//! assert_eq!(group.slices()[1].depth, 1);
//! ```

use crate::color::color_id_for;
use crate::error::{ModelError, OrderingKind, Result};
use crate::object_snapshot::IdRef;
use crate::range::Range;
use crate::timestamp::Timestamp;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// A single interval of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice {
    pub category: String,
    pub title: String,
    /// Palette index derived from the title
    pub color: u32,
    pub start: Timestamp,
    pub duration_nanos: u64,
    pub args: Value,
    /// Nesting depth, 0 for top-level slices
    pub depth: usize,
    /// Indices of direct children inside the owning group
    pub sub_slices: Vec<usize>,
    /// True when the slice was still open at the end of the trace
    pub did_not_finish: bool,
    /// Object snapshots referenced from the args
    pub object_refs: Vec<IdRef>,
}

impl Slice {
    pub fn new(
        category: impl Into<String>,
        title: impl Into<String>,
        start: Timestamp,
        duration_nanos: u64,
        args: Value,
    ) -> Self {
        let title = title.into();
        Slice {
            category: category.into(),
            color: color_id_for(&title),
            title,
            start,
            duration_nanos,
            args,
            depth: 0,
            sub_slices: Vec::new(),
            did_not_finish: false,
            object_refs: Vec::new(),
        }
    }

    pub fn end(&self) -> Timestamp {
        self.start.saturating_add_nanos(self.duration_nanos)
    }

    /// True when `other` lies within `[start, end]`
    pub fn contains(&self, other: &Slice) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }

    fn close_at(&mut self, end: Timestamp) {
        self.duration_nanos = end.nanos_since(self.start);
    }

    fn shift_timestamps_forward(&mut self, amount: i64) {
        self.start = self.start.shifted(amount);
    }
}

/// Start-ordered slices of one timeline, plus the stack of open ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceGroup {
    slices: Vec<Slice>,
    open: Vec<Slice>,
    bounds: Range,
}

impl SliceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub(crate) fn slices_mut(&mut self) -> &mut [Slice] {
        &mut self.slices
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Slice> {
        self.slices.iter()
    }

    /// Number of closed slices
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty() && self.open.is_empty()
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    /// Append a complete slice
    ///
    /// Its start must not precede the start of the last slice.
    pub fn push_slice(&mut self, slice: Slice) -> Result<&Slice> {
        if let Some(last) = self.slices.last() {
            if slice.start < last.start {
                return Err(ModelError::ordering(
                    format!("slice {}", slice.title),
                    slice.start,
                    OrderingKind::SliceBeforePrevious {
                        previous_start: last.start,
                    },
                ));
            }
        }
        self.slices.push(slice);
        Ok(&self.slices[self.slices.len() - 1])
    }

    /// Open a slice at `ts`; it stays on the stack until `end_slice`
    pub fn begin_slice(
        &mut self,
        category: impl Into<String>,
        title: impl Into<String>,
        ts: Timestamp,
        args: Value,
    ) -> &Slice {
        self.open.push(Slice::new(category, title, ts, 0, args));
        &self.open[self.open.len() - 1]
    }

    /// Close the most recently opened slice at `ts`
    ///
    /// Extra args are merged into the slice's own args when both are
    /// objects.
    pub fn end_slice_with_args(&mut self, ts: Timestamp, args: Value) -> Result<&Slice> {
        let Some(top) = self.open.last() else {
            return Err(ModelError::NoOpenSlice { ts });
        };
        if ts < top.start {
            return Err(ModelError::ordering(
                format!("slice {}", top.title),
                ts,
                OrderingKind::SliceEndBeforeStart { start: top.start },
            ));
        }
        let Some(mut slice) = self.open.pop() else {
            return Err(ModelError::NoOpenSlice { ts });
        };
        slice.close_at(ts);
        merge_args(&mut slice.args, args);
        Ok(self.insert_sorted(slice))
    }

    pub fn end_slice(&mut self, ts: Timestamp) -> Result<&Slice> {
        self.end_slice_with_args(ts, Value::Null)
    }

    /// Insert a complete slice at its start-sorted position
    ///
    /// Complete slices are usually emitted when they end, so a parent
    /// arrives after its children.
    pub fn insert_slice(&mut self, slice: Slice) -> &Slice {
        self.insert_sorted(slice)
    }

    fn insert_sorted(&mut self, slice: Slice) -> &Slice {
        let index = self.slices.partition_point(|s| s.start <= slice.start);
        self.slices.insert(index, slice);
        &self.slices[index]
    }

    pub fn open_slice_count(&self) -> usize {
        self.open.len()
    }

    pub fn most_recently_opened(&self) -> Option<&Slice> {
        self.open.last()
    }

    /// Close every open slice and mark it unfinished
    ///
    /// Slices end at `max_ts` when given, otherwise at the group's latest
    /// timestamp. Returns how many slices were closed.
    pub fn auto_close_open_slices(&mut self, max_ts: Option<Timestamp>) -> usize {
        if self.open.is_empty() {
            return 0;
        }
        let end = max_ts.or_else(|| {
            self.update_bounds();
            self.bounds.max()
        });
        let count = self.open.len();
        while let Some(mut slice) = self.open.pop() {
            slice.close_at(end.unwrap_or(slice.start));
            slice.did_not_finish = true;
            self.insert_sorted(slice);
        }
        count
    }

    /// Derive `depth` and `sub_slices` from containment
    ///
    /// Slices are re-sorted by start, longest first on ties, so parents
    /// precede their children; a slice that only partially overlaps the
    /// previous one becomes its sibling.
    pub fn create_sub_slices(&mut self) {
        self.slices.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| b.duration_nanos.cmp(&a.duration_nanos))
        });

        let mut stack: Vec<usize> = Vec::new();
        for index in 0..self.slices.len() {
            self.slices[index].sub_slices.clear();
            while let Some(&parent) = stack.last() {
                if self.slices[parent].contains(&self.slices[index]) {
                    break;
                }
                stack.pop();
            }
            self.slices[index].depth = stack.len();
            if let Some(&parent) = stack.last() {
                self.slices[parent].sub_slices.push(index);
            }
            stack.push(index);
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for slice in self.slices.iter_mut().chain(self.open.iter_mut()) {
            slice.shift_timestamps_forward(amount);
        }
    }

    /// Recompute bounds over every slice's `[start, end]`; open slices
    /// contribute their start
    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for slice in &self.slices {
            self.bounds.add_value(slice.start);
            self.bounds.add_value(slice.end());
        }
        for slice in &self.open {
            self.bounds.add_value(slice.start);
        }
    }

    pub fn add_categories_to(&self, categories: &mut BTreeSet<String>) {
        for slice in self.slices.iter().chain(self.open.iter()) {
            if !categories.contains(&slice.category) {
                categories.insert(slice.category.clone());
            }
        }
    }
}

fn merge_args(target: &mut Value, extra: Value) {
    match extra {
        Value::Null => {}
        Value::Object(extra) => match target {
            Value::Object(target) => target.extend(extra),
            _ => *target = Value::Object(extra),
        },
        extra => {
            if target.is_null() {
                *target = extra;
            }
        }
    }
}
