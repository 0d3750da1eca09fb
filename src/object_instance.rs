//! One lifetime segment of an identifier
//!
//! An `ObjectInstance` spans `[creation_ts, deletion_ts]` and owns the
//! snapshots taken in between, in strictly increasing timestamp order.
//! Category and name are fixed when the instance is created. Once the
//! instance is deleted it only serves as a historical record.

use crate::color::color_id_for;
use crate::error::{IdentityField, ModelError, OrderingKind, Result};
use crate::object_id::ObjectId;
use crate::object_snapshot::{InstanceHandle, ObjectSnapshot, SnapshotHandle};
use crate::range::Range;
use crate::timestamp::Timestamp;
use serde_json::Value;

/// Lifetime segment of an id, with its snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    handle: InstanceHandle,
    category: String,
    name: String,
    creation_ts: Timestamp,
    deletion_ts: Timestamp,
    snapshots: Vec<ObjectSnapshot>,
    has_implicit_snapshots: bool,
}

impl ObjectInstance {
    pub(crate) fn new(
        handle: InstanceHandle,
        category: impl Into<String>,
        name: impl Into<String>,
        creation_ts: Timestamp,
    ) -> Self {
        ObjectInstance {
            handle,
            category: category.into(),
            name: name.into(),
            creation_ts,
            deletion_ts: Timestamp::INFINITY,
            snapshots: Vec::new(),
            has_implicit_snapshots: false,
        }
    }

    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    pub fn id(&self) -> &ObjectId {
        &self.handle.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type name of an object is the name it was created with
    pub fn type_name(&self) -> &str {
        &self.name
    }

    /// Palette index shared by every instance of the same type
    pub fn color_id(&self) -> u32 {
        color_id_for(&self.name)
    }

    pub fn creation_ts(&self) -> Timestamp {
        self.creation_ts
    }

    /// `Timestamp::INFINITY` while the instance is alive
    pub fn deletion_ts(&self) -> Timestamp {
        self.deletion_ts
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_ts.is_finite()
    }

    /// True when `ts` falls in `[creation_ts, deletion_ts)`
    pub fn is_alive_at(&self, ts: Timestamp) -> bool {
        self.creation_ts <= ts && ts < self.deletion_ts
    }

    pub fn snapshots(&self) -> &[ObjectSnapshot] {
        &self.snapshots
    }

    pub fn last_snapshot(&self) -> Option<&ObjectSnapshot> {
        self.snapshots.last()
    }

    /// True when some snapshot was extracted from another snapshot's args
    pub fn has_implicit_snapshots(&self) -> bool {
        self.has_implicit_snapshots
    }

    /// Category and name must match the ones given at creation
    pub fn check_identity(&self, category: &str, name: &str) -> Result<()> {
        if category != self.category {
            return Err(self.identity_mismatch(IdentityField::Category, &self.category, category));
        }
        if name != self.name {
            return Err(self.identity_mismatch(IdentityField::Name, &self.name, name));
        }
        Ok(())
    }

    fn identity_mismatch(&self, field: IdentityField, expected: &str, actual: &str) -> ModelError {
        ModelError::IdentityMismatch {
            id: self.handle.id.to_string(),
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Append a snapshot taken at `ts`
    ///
    /// `ts` must not precede creation, the instance must still be alive and
    /// `ts` must be strictly after the last snapshot. The previous snapshot
    /// becomes valid until `ts`.
    pub fn add_snapshot(&mut self, ts: Timestamp, args: Value) -> Result<&ObjectSnapshot> {
        if ts < self.creation_ts {
            return Err(ModelError::ordering(
                self.handle.id.as_str(),
                ts,
                OrderingKind::SnapshotBeforeCreation {
                    creation_ts: self.creation_ts,
                },
            ));
        }
        if self.is_deleted() {
            return Err(ModelError::ordering(
                self.handle.id.as_str(),
                ts,
                OrderingKind::SnapshotAfterDeletion {
                    deletion_ts: self.deletion_ts,
                },
            ));
        }
        if let Some(last) = self.snapshots.last_mut() {
            if ts == last.ts() {
                return Err(ModelError::DuplicateTimestamp {
                    id: self.handle.id.to_string(),
                    ts,
                });
            }
            if ts < last.ts() {
                return Err(ModelError::ordering(
                    self.handle.id.as_str(),
                    ts,
                    OrderingKind::SnapshotBeforePrevious {
                        previous_ts: last.ts(),
                    },
                ));
            }
            last.set_valid_before_ts(ts);
        }

        let handle = SnapshotHandle {
            instance: self.handle.clone(),
            index: self.snapshots.len(),
        };
        self.snapshots.push(ObjectSnapshot::new(handle, ts, args));
        Ok(&self.snapshots[self.snapshots.len() - 1])
    }

    /// Close the instance at `ts`
    ///
    /// `ts` must not precede creation or the last snapshot; the last
    /// snapshot becomes valid until `ts`.
    pub fn was_deleted(&mut self, ts: Timestamp) -> Result<()> {
        if ts < self.creation_ts {
            return Err(ModelError::ordering(
                self.handle.id.as_str(),
                ts,
                OrderingKind::DeleteBeforeCreation {
                    creation_ts: self.creation_ts,
                },
            ));
        }
        if let Some(last) = self.snapshots.last_mut() {
            if ts < last.ts() {
                return Err(ModelError::ordering(
                    self.handle.id.as_str(),
                    ts,
                    OrderingKind::DeleteBeforeLastSnapshot {
                        snapshot_ts: last.ts(),
                    },
                ));
            }
            last.set_valid_before_ts(ts);
        }
        self.deletion_ts = ts;
        Ok(())
    }

    /// Snapshot current at `ts`
    ///
    /// The query must fall inside `[creation_ts, deletion_ts]`; anything
    /// outside is an `OutOfRangeQuery` (use the collection for lenient
    /// lookups). Returns `None` before the first snapshot. At exactly
    /// `deletion_ts` the last snapshot is returned.
    pub fn get_snapshot_at(&self, ts: Timestamp) -> Result<Option<&ObjectSnapshot>> {
        if ts < self.creation_ts || ts > self.deletion_ts {
            return Err(ModelError::OutOfRangeQuery {
                id: self.handle.id.to_string(),
                ts,
                creation_ts: self.creation_ts,
                deletion_ts: self.deletion_ts,
            });
        }
        // Validity intervals are contiguous, so the snapshot containing `ts`
        // is the last one starting at or before it.
        let index = self.snapshots.partition_point(|s| s.ts() <= ts);
        Ok(index.checked_sub(1).map(|i| &self.snapshots[i]))
    }

    /// `[creation_ts, max(deletion_ts, last snapshot ts)]`; an open instance
    /// spans creation to its last snapshot
    pub fn bounds(&self) -> Range {
        let mut bounds = Range::new();
        bounds.add_value(self.creation_ts);
        if self.is_deleted() {
            bounds.add_value(self.deletion_ts);
        }
        if let Some(last) = self.snapshots.last() {
            bounds.add_value(last.ts());
        }
        bounds
    }

    pub(crate) fn snapshots_mut(&mut self) -> &mut [ObjectSnapshot] {
        &mut self.snapshots
    }

    pub(crate) fn snapshot_mut(&mut self, index: usize) -> Option<&mut ObjectSnapshot> {
        self.snapshots.get_mut(index)
    }

    pub(crate) fn mark_has_implicit_snapshots(&mut self) {
        self.has_implicit_snapshots = true;
    }

    pub(crate) fn shift_timestamps_forward(&mut self, amount: i64) {
        self.creation_ts = self.creation_ts.shifted(amount);
        self.deletion_ts = self.deletion_ts.shifted(amount);
        for snapshot in &mut self.snapshots {
            snapshot.shift_timestamps_forward(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(nanos: i64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    fn instance_at(creation: i64) -> ObjectInstance {
        ObjectInstance::new(
            InstanceHandle {
                id: ObjectId::from("0x1"),
                index: 0,
            },
            "cc",
            "cc::Tile",
            ts(creation),
        )
    }

    // Test 1: Consecutive snapshots tile the timeline
    #[test]
    fn test_validity_chain() {
        let mut instance = instance_at(10);
        instance.add_snapshot(ts(10), json!({"a": 1})).unwrap();
        instance.add_snapshot(ts(25), json!({"a": 2})).unwrap();
        instance.add_snapshot(ts(30), json!({"a": 3})).unwrap();
        instance.was_deleted(ts(45)).unwrap();

        let snapshots = instance.snapshots();
        assert_eq!(snapshots[0].valid_before_ts(), ts(25));
        assert_eq!(snapshots[1].valid_before_ts(), ts(30));
        assert_eq!(snapshots[2].valid_before_ts(), ts(45));
        assert_eq!(snapshots[2].handle().index, 2);
    }

    // Test 2: Point queries
    #[test]
    fn test_get_snapshot_at() {
        let mut instance = instance_at(5);
        instance.add_snapshot(ts(10), json!({"a": 1})).unwrap();
        instance.add_snapshot(ts(25), json!({"a": 2})).unwrap();
        instance.was_deleted(ts(45)).unwrap();

        assert!(instance.get_snapshot_at(ts(7)).unwrap().is_none());
        assert_eq!(instance.get_snapshot_at(ts(10)).unwrap().unwrap().args()["a"], 1);
        assert_eq!(instance.get_snapshot_at(ts(24)).unwrap().unwrap().args()["a"], 1);
        assert_eq!(instance.get_snapshot_at(ts(25)).unwrap().unwrap().args()["a"], 2);
        assert_eq!(instance.get_snapshot_at(ts(45)).unwrap().unwrap().args()["a"], 2);
    }

    // Test 3: Queries outside the lifetime are errors
    #[test]
    fn test_get_snapshot_out_of_range() {
        let mut instance = instance_at(10);
        instance.was_deleted(ts(45)).unwrap();
        assert!(matches!(
            instance.get_snapshot_at(ts(9)),
            Err(ModelError::OutOfRangeQuery { .. })
        ));
        assert!(matches!(
            instance.get_snapshot_at(ts(46)),
            Err(ModelError::OutOfRangeQuery { .. })
        ));
    }

    // Test 4: Duplicate and out-of-order snapshots
    #[test]
    fn test_snapshot_ordering_errors() {
        let mut instance = instance_at(10);
        instance.add_snapshot(ts(20), json!({})).unwrap();

        let err = instance.add_snapshot(ts(20), json!({})).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateTimestamp { .. }));

        let err = instance.add_snapshot(ts(15), json!({})).unwrap_err();
        assert!(matches!(
            err,
            ModelError::OrderingViolation {
                kind: OrderingKind::SnapshotBeforePrevious { .. },
                ..
            }
        ));

        let err = instance.add_snapshot(ts(5), json!({})).unwrap_err();
        assert!(matches!(
            err,
            ModelError::OrderingViolation {
                kind: OrderingKind::SnapshotBeforeCreation { .. },
                ..
            }
        ));

        // Rejected snapshots leave the chain untouched
        assert_eq!(instance.snapshots().len(), 1);
        assert_eq!(instance.snapshots()[0].valid_before_ts(), Timestamp::INFINITY);
    }

    // Test 5: No snapshots after deletion
    #[test]
    fn test_snapshot_after_deletion() {
        let mut instance = instance_at(10);
        instance.was_deleted(ts(20)).unwrap();
        let err = instance.add_snapshot(ts(30), json!({})).unwrap_err();
        assert!(matches!(
            err,
            ModelError::OrderingViolation {
                kind: OrderingKind::SnapshotAfterDeletion { .. },
                ..
            }
        ));
    }

    // Test 6: Deleting before the last snapshot
    #[test]
    fn test_delete_before_last_snapshot() {
        let mut instance = instance_at(10);
        instance.add_snapshot(ts(30), json!({})).unwrap();
        let err = instance.was_deleted(ts(20)).unwrap_err();
        assert!(matches!(
            err,
            ModelError::OrderingViolation {
                kind: OrderingKind::DeleteBeforeLastSnapshot { .. },
                ..
            }
        ));
        assert!(!instance.is_deleted());
    }

    #[test]
    fn test_identity_check() {
        let instance = instance_at(0);
        assert!(instance.check_identity("cc", "cc::Tile").is_ok());
        assert!(matches!(
            instance.check_identity("gpu", "cc::Tile"),
            Err(ModelError::IdentityMismatch {
                field: IdentityField::Category,
                ..
            })
        ));
        assert!(matches!(
            instance.check_identity("cc", "cc::Layer"),
            Err(ModelError::IdentityMismatch {
                field: IdentityField::Name,
                ..
            })
        ));
    }

    #[test]
    fn test_bounds() {
        let mut instance = instance_at(10);
        instance.add_snapshot(ts(30), json!({})).unwrap();
        assert_eq!(instance.bounds().max(), Some(ts(30)));
        instance.was_deleted(ts(45)).unwrap();
        assert_eq!(instance.bounds().min(), Some(ts(10)));
        assert_eq!(instance.bounds().max(), Some(ts(45)));
    }

    #[test]
    fn test_is_alive_at() {
        let mut instance = instance_at(10);
        assert!(instance.is_alive_at(ts(1_000)));
        instance.was_deleted(ts(20)).unwrap();
        assert!(instance.is_alive_at(ts(19)));
        assert!(!instance.is_alive_at(ts(20)));
        assert!(!instance.is_alive_at(ts(9)));
    }
}
