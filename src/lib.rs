//! Tracemodel - time-indexed model of a decoded trace
//!
//! This library builds a queryable, time-ordered model from trace events:
//! objects that are created, snapshotted and deleted (with identifier
//! reuse), numeric counters, and slice groups, organized in a
//! process/thread/cpu hierarchy with recursively aggregated bounds.
//!
//! ```text
//! TraceEvent ──▶ EventImporter ──▶ TraceModel
//!                                   ├─ Kernel / Process ─ ProcessBase
//!                                   │    ├─ Thread ─ SliceGroup ─ Slice
//!                                   │    ├─ Counter ─ CounterSeries
//!                                   │    └─ ObjectCollection
//!                                   │         └─ TimeToObjectInstanceMap (per id)
//!                                   │              └─ ObjectInstance ─ ObjectSnapshot
//!                                   └─ Cpu ─ SliceGroup, Counter
//! ```
//!
//! Parsing trace file formats is left to callers.

pub mod color;
pub mod config;
pub mod counter;
pub mod cpu;
pub mod error;
pub mod importer;
pub mod model;
pub mod object_collection;
pub mod object_id;
pub mod object_instance;
pub mod object_snapshot;
pub mod payload;
pub mod process;
pub mod range;
pub mod slice;
pub mod thread;
pub mod time_to_object_instance_map;
pub mod timestamp;

pub use config::ModelConfig;
pub use counter::{Counter, CounterSeries, SampleStatistics};
pub use cpu::Cpu;
pub use error::{IdentityField, ModelError, OrderingKind, Result};
pub use importer::{EventImporter, ImportOutcome, ImportProgress, ImportSummary, TraceEvent};
pub use model::{FinalizeReport, ImportWarning, TraceModel};
pub use object_collection::ObjectCollection;
pub use object_id::ObjectId;
pub use object_instance::ObjectInstance;
pub use object_snapshot::{IdRef, InstanceHandle, ObjectSnapshot, SnapshotHandle};
pub use payload::{PayloadDecoder, PayloadError, PayloadRegistry, SnapshotPayload};
pub use process::{Kernel, Process, ProcessBase};
pub use range::Range;
pub use slice::{Slice, SliceGroup};
pub use thread::Thread;
pub use time_to_object_instance_map::TimeToObjectInstanceMap;
pub use timestamp::Timestamp;
