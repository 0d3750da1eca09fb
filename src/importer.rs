//! Feeding decoded trace events into a `TraceModel`
//!
//! Parsing a trace format is someone else's job; the importer receives
//! already-decoded `TraceEvent`s and applies them to the model:
//!
//! - slice, counter and metadata events are applied as they arrive;
//! - object events are buffered and applied at the end, stable-sorted by
//!   timestamp, since producers emit them from several threads;
//! - an event the model rejects becomes an import warning and the import
//!   continues with the next event.
//!
//! Long imports can be split with `import_chunked`, which hands control
//! back to the caller between whole events. Returning
//! `ControlFlow::Break` from the callback stops the import; the model stays
//! valid but incomplete.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tracemodel::importer::{EventImporter, TraceEvent};
//! use tracemodel::model::TraceModel;
//! use tracemodel::timestamp::Timestamp;
//!
//! let mut model = TraceModel::new();
//! let mut importer = EventImporter::new(&mut model);
//! importer.push(TraceEvent::ObjectSnapshotted {
//!     pid: 1,
//!     id: "0x1".into(),
//!     category: "cc".into(),
//!     name: "cc::Tile".into(),
//!     ts: Timestamp::from_nanos(10),
//!     args: json!({"contents_scale": 1.0}),
//! });
//! let summary = importer.finish();
//! assert_eq!(summary.events, 1);
//! assert_eq!(summary.warnings, 0);
//! ```

use crate::error::ModelError;
use crate::model::TraceModel;
use crate::slice::Slice;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::ControlFlow;
use tracing::{debug, info};

/// One decoded trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    ObjectCreated {
        pid: i64,
        id: String,
        category: String,
        name: String,
        ts: Timestamp,
    },
    /// A `cat` field inside `args` overrides the event category
    ObjectSnapshotted {
        pid: i64,
        id: String,
        category: String,
        name: String,
        ts: Timestamp,
        args: Value,
    },
    ObjectDeleted {
        pid: i64,
        id: String,
        category: String,
        name: String,
        ts: Timestamp,
    },
    CounterSample {
        pid: i64,
        category: String,
        name: String,
        series: String,
        ts: Timestamp,
        value: f64,
    },
    SliceBegin {
        pid: i64,
        tid: i64,
        category: String,
        title: String,
        ts: Timestamp,
        #[serde(default)]
        args: Value,
    },
    SliceEnd {
        pid: i64,
        tid: i64,
        ts: Timestamp,
        #[serde(default)]
        args: Value,
    },
    CompleteSlice {
        pid: i64,
        tid: i64,
        category: String,
        title: String,
        ts: Timestamp,
        duration_nanos: u64,
        #[serde(default)]
        args: Value,
    },
    ProcessName {
        pid: i64,
        name: String,
    },
    ThreadName {
        pid: i64,
        tid: i64,
        name: String,
    },
}

impl TraceEvent {
    /// Timestamp of the event; metadata events sort first
    pub fn ts(&self) -> Timestamp {
        match self {
            TraceEvent::ObjectCreated { ts, .. }
            | TraceEvent::ObjectSnapshotted { ts, .. }
            | TraceEvent::ObjectDeleted { ts, .. }
            | TraceEvent::CounterSample { ts, .. }
            | TraceEvent::SliceBegin { ts, .. }
            | TraceEvent::SliceEnd { ts, .. }
            | TraceEvent::CompleteSlice { ts, .. } => *ts,
            TraceEvent::ProcessName { .. } | TraceEvent::ThreadName { .. } => Timestamp::from_nanos(i64::MIN),
        }
    }

    pub fn is_object_event(&self) -> bool {
        matches!(
            self,
            TraceEvent::ObjectCreated { .. } | TraceEvent::ObjectSnapshotted { .. } | TraceEvent::ObjectDeleted { .. }
        )
    }
}

/// Result counts of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Events received
    pub events: usize,
    /// Import warnings added by this import
    pub warnings: usize,
}

/// Position of a chunked import, passed to the yield callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub events_read: usize,
    pub object_events_applied: usize,
    pub object_events_total: usize,
}

/// How a chunked import ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Completed(ImportSummary),
    /// The yield callback asked to stop
    Cancelled(ImportSummary),
}

/// Applies decoded events to a model, one event at a time
#[derive(Debug)]
pub struct EventImporter<'m> {
    model: &'m mut TraceModel,
    object_events: Vec<TraceEvent>,
    events: usize,
    warnings_before: usize,
}

impl<'m> EventImporter<'m> {
    pub fn new(model: &'m mut TraceModel) -> Self {
        let warnings_before = model.import_warnings().len();
        EventImporter {
            model,
            object_events: Vec::new(),
            events: 0,
            warnings_before,
        }
    }

    /// Object events waiting for `finish`
    pub fn pending_object_events(&self) -> usize {
        self.object_events.len()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events += 1;
        if event.is_object_event() {
            self.object_events.push(event);
        } else {
            self.apply(event);
        }
    }

    /// Apply the buffered object events in timestamp order
    pub fn finish(mut self) -> ImportSummary {
        // Never breaks: the callback always continues
        let _ = self.flush_object_events(usize::MAX, |_| ControlFlow::Continue(()));
        self.completed()
    }

    /// Import every event in one go
    pub fn import_events<I>(mut self, events: I) -> ImportSummary
    where
        I: IntoIterator<Item = TraceEvent>,
    {
        for event in events {
            self.push(event);
        }
        self.finish()
    }

    /// Import `events`, yielding to `on_yield` every `chunk_size` events
    ///
    /// Yields happen only between whole events: while reading, and again
    /// while the sorted object events are applied.
    pub fn import_chunked<I, F>(mut self, events: I, chunk_size: usize, mut on_yield: F) -> ImportOutcome
    where
        I: IntoIterator<Item = TraceEvent>,
        F: FnMut(ImportProgress) -> ControlFlow<()>,
    {
        let chunk_size = chunk_size.max(1);
        for event in events {
            self.push(event);
            if self.events % chunk_size == 0 {
                let progress = ImportProgress {
                    events_read: self.events,
                    object_events_applied: 0,
                    object_events_total: self.object_events.len(),
                };
                if on_yield(progress).is_break() {
                    debug!(events = self.events, "import cancelled while reading events");
                    return ImportOutcome::Cancelled(self.cancelled());
                }
            }
        }

        match self.flush_object_events(chunk_size, on_yield) {
            ControlFlow::Continue(()) => ImportOutcome::Completed(self.completed()),
            ControlFlow::Break(()) => ImportOutcome::Cancelled(self.cancelled()),
        }
    }

    fn summary(&self) -> ImportSummary {
        ImportSummary {
            events: self.events,
            warnings: self.model.import_warnings().len() - self.warnings_before,
        }
    }

    fn completed(&self) -> ImportSummary {
        let summary = self.summary();
        info!(events = summary.events, warnings = summary.warnings, "import finished");
        summary
    }

    fn cancelled(&self) -> ImportSummary {
        let summary = self.summary();
        info!(
            events = summary.events,
            warnings = summary.warnings,
            pending_object_events = self.object_events.len(),
            "import cancelled"
        );
        summary
    }

    fn flush_object_events<F>(&mut self, chunk_size: usize, mut on_yield: F) -> ControlFlow<()>
    where
        F: FnMut(ImportProgress) -> ControlFlow<()>,
    {
        let mut events = std::mem::take(&mut self.object_events);
        // Stable: events with equal timestamps keep their arrival order
        events.sort_by_key(TraceEvent::ts);

        let total = events.len();
        for (index, event) in events.into_iter().enumerate() {
            self.apply(event);
            let applied = index + 1;
            if applied % chunk_size == 0 && applied < total {
                let progress = ImportProgress {
                    events_read: self.events,
                    object_events_applied: applied,
                    object_events_total: total,
                };
                if on_yield(progress).is_break() {
                    debug!(applied, total, "import cancelled while applying object events");
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn apply(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::ObjectCreated {
                pid,
                id,
                category,
                name,
                ts,
            } => {
                if !self.check_object_event(&id, &name, ts) {
                    return;
                }
                let objects = self.model.get_or_create_process(pid).objects_mut();
                let result = objects.id_was_created(&id, &category, &name, ts).map(|_| ());
                if let Err(e) = result {
                    self.object_warning("create", &id, ts, &e);
                }
            }
            TraceEvent::ObjectSnapshotted {
                pid,
                id,
                category,
                name,
                ts,
                mut args,
            } => {
                if !self.check_object_event(&id, &name, ts) {
                    return;
                }
                let category = match args.as_object_mut().and_then(|map| map.remove("cat")) {
                    Some(Value::String(cat)) => cat,
                    _ => category,
                };
                if let Some(map) = args.as_object_mut() {
                    map.remove("base_type");
                }
                let objects = self.model.get_or_create_process(pid).objects_mut();
                if let Err(e) = objects.add_snapshot(&id, &category, &name, ts, args) {
                    self.object_warning("snapshot", &id, ts, &e);
                }
            }
            TraceEvent::ObjectDeleted {
                pid,
                id,
                category,
                name,
                ts,
            } => {
                if !self.check_object_event(&id, &name, ts) {
                    return;
                }
                let objects = self.model.get_or_create_process(pid).objects_mut();
                let result = objects.id_was_deleted(&id, &category, &name, ts).map(|_| ());
                if let Err(e) = result {
                    self.object_warning("delete", &id, ts, &e);
                }
            }
            TraceEvent::CounterSample {
                pid,
                category,
                name,
                series,
                ts,
                value,
            } => {
                let result = self
                    .model
                    .get_or_create_process(pid)
                    .base_mut()
                    .get_or_create_counter(&category, &name)
                    .get_or_add_series(&series)
                    .add_sample(ts, value);
                if let Err(e) = result {
                    self.model.import_warning(
                        "counter_parse_error",
                        format!("While processing sample of {} at ts={}: {}", name, ts, e),
                    );
                }
            }
            TraceEvent::SliceBegin {
                pid,
                tid,
                category,
                title,
                ts,
                args,
            } => {
                self.model
                    .get_or_create_process(pid)
                    .base_mut()
                    .get_or_create_thread(tid)
                    .slice_group_mut()
                    .begin_slice(category, title, ts, args);
            }
            TraceEvent::SliceEnd { pid, tid, ts, args } => {
                let result = self
                    .model
                    .get_or_create_process(pid)
                    .base_mut()
                    .get_or_create_thread(tid)
                    .slice_group_mut()
                    .end_slice_with_args(ts, args)
                    .map(|_| ());
                if let Err(e) = result {
                    self.slice_warning(tid, ts, &e);
                }
            }
            TraceEvent::CompleteSlice {
                pid,
                tid,
                category,
                title,
                ts,
                duration_nanos,
                args,
            } => {
                self.model
                    .get_or_create_process(pid)
                    .base_mut()
                    .get_or_create_thread(tid)
                    .slice_group_mut()
                    .insert_slice(Slice::new(category, title, ts, duration_nanos, args));
            }
            TraceEvent::ProcessName { pid, name } => {
                self.model.get_or_create_process(pid).set_name(name);
            }
            TraceEvent::ThreadName { pid, tid, name } => {
                self.model
                    .get_or_create_process(pid)
                    .base_mut()
                    .get_or_create_thread(tid)
                    .set_name(name);
            }
        }
    }

    /// Object events need an id and a name
    fn check_object_event(&mut self, id: &str, name: &str, ts: Timestamp) -> bool {
        if id.is_empty() {
            self.model.import_warning(
                "object_parse_error",
                format!("While processing object event at ts={}: Object events require an id parameter.", ts),
            );
            return false;
        }
        if name.is_empty() {
            self.model.import_warning(
                "object_parse_error",
                format!("While processing {} at ts={}: Object events require a name parameter.", id, ts),
            );
            return false;
        }
        true
    }

    fn object_warning(&mut self, what: &str, id: &str, ts: Timestamp, e: &ModelError) {
        self.model.import_warning(
            "object_parse_error",
            format!("While processing {} of {} at ts={}: {}", what, id, ts, e),
        );
    }

    fn slice_warning(&mut self, tid: i64, ts: Timestamp, e: &ModelError) {
        self.model.import_warning(
            "slice_parse_error",
            format!("While processing slice end on tid {} at ts={}: {}", tid, ts, e),
        );
    }
}
