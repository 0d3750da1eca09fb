//! Point-in-time captures of an object
//!
//! A snapshot is valid over the half-open interval `[ts, valid_before_ts)`.
//! `valid_before_ts` starts at `Timestamp::INFINITY` and is tightened exactly
//! once by the owning instance: to the next snapshot's timestamp, or to the
//! deletion timestamp. After that the snapshot never changes again, apart
//! from the payload being filled in once at initialization.

use crate::object_id::ObjectId;
use crate::payload::SnapshotPayload;
use crate::timestamp::Timestamp;
use serde::Serialize;
use serde_json::Value;

/// Back-reference from a snapshot to its instance
///
/// `index` is the instance's position in its id's reuse history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceHandle {
    pub id: ObjectId,
    pub index: usize,
}

/// Stable address of a snapshot inside an `ObjectCollection`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnapshotHandle {
    pub instance: InstanceHandle,
    pub index: usize,
}

/// An `id_ref` field resolved to the snapshot alive at the referencing time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    /// JSON pointer (RFC 6901) to the referencing object inside the args
    pub pointer: String,
    pub target: SnapshotHandle,
}

/// Data captured for one instance at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    handle: SnapshotHandle,
    ts: Timestamp,
    args: Value,
    valid_before_ts: Timestamp,
    payload: Option<SnapshotPayload>,
    containing_snapshot: Option<SnapshotHandle>,
    refs: Vec<IdRef>,
}

impl ObjectSnapshot {
    pub(crate) fn new(handle: SnapshotHandle, ts: Timestamp, args: Value) -> Self {
        ObjectSnapshot {
            handle,
            ts,
            args,
            valid_before_ts: Timestamp::INFINITY,
            payload: None,
            containing_snapshot: None,
            refs: Vec::new(),
        }
    }

    pub fn handle(&self) -> &SnapshotHandle {
        &self.handle
    }

    /// The owning instance
    pub fn instance(&self) -> &InstanceHandle {
        &self.handle.instance
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Raw args as delivered by the importer
    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn valid_before_ts(&self) -> Timestamp {
        self.valid_before_ts
    }

    /// True when `ts` falls in `[self.ts, valid_before_ts)`
    pub fn is_valid_at(&self, ts: Timestamp) -> bool {
        self.ts <= ts && ts < self.valid_before_ts
    }

    /// Typed payload, available once the owning collection was initialized
    pub fn payload(&self) -> Option<&SnapshotPayload> {
        self.payload.as_ref()
    }

    /// For implicit snapshots: the snapshot whose args contained this one
    pub fn containing_snapshot(&self) -> Option<&SnapshotHandle> {
        self.containing_snapshot.as_ref()
    }

    /// Resolved `id_ref` fields found in the args
    pub fn refs(&self) -> &[IdRef] {
        &self.refs
    }

    pub(crate) fn set_valid_before_ts(&mut self, ts: Timestamp) {
        self.valid_before_ts = ts;
    }

    pub(crate) fn args_mut(&mut self) -> &mut Value {
        &mut self.args
    }

    pub(crate) fn set_payload(&mut self, payload: SnapshotPayload) {
        self.payload = Some(payload);
    }

    pub(crate) fn set_containing_snapshot(&mut self, handle: SnapshotHandle) {
        self.containing_snapshot = Some(handle);
    }

    pub(crate) fn set_refs(&mut self, refs: Vec<IdRef>) {
        self.refs = refs;
    }

    pub(crate) fn shift_timestamps_forward(&mut self, amount: i64) {
        self.ts = self.ts.shifted(amount);
        self.valid_before_ts = self.valid_before_ts.shifted(amount);
    }
}
