//! Reuse history of one identifier
//!
//! Identifiers are recycled by the traced program (pointer values, mostly),
//! so one id maps to a sequence of instances whose lifetimes never overlap:
//!
//! ```text
//!   Unborn ──create/snapshot──▶ Alive ──delete──▶ Dead ──create/snapshot──▶ Alive ...
//! ```
//!
//! Mutations must arrive in non-decreasing timestamp order. Out-of-order
//! input is rejected, never repaired, with two tolerated exceptions:
//!
//! - a snapshot for an id with no live instance starts a new instance at the
//!   snapshot's timestamp (no explicit create event was traced);
//! - a delete of an already dead instance at or after its deletion time is a
//!   no-op (duplicate delete events).
//!
//! A snapshot that lands before the recorded deletion of a dead instance is
//! *not* tolerated; it surfaces as `SnapshotAfterDeletion`.

use crate::error::{ModelError, OrderingKind, Result};
use crate::object_id::ObjectId;
use crate::object_instance::ObjectInstance;
use crate::object_snapshot::{InstanceHandle, SnapshotHandle};
use crate::timestamp::Timestamp;
use serde_json::Value;
use tracing::debug;

/// Ordered, non-overlapping instances of one id
#[derive(Debug, Clone, PartialEq)]
pub struct TimeToObjectInstanceMap {
    id: ObjectId,
    instances: Vec<ObjectInstance>,
}

impl TimeToObjectInstanceMap {
    pub fn new(id: ObjectId) -> Self {
        TimeToObjectInstanceMap {
            id,
            instances: Vec::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn instances(&self) -> &[ObjectInstance] {
        &self.instances
    }

    pub fn last_instance(&self) -> Option<&ObjectInstance> {
        self.instances.last()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn push_instance(&mut self, category: &str, name: &str, ts: Timestamp) -> &mut ObjectInstance {
        let handle = InstanceHandle {
            id: self.id.clone(),
            index: self.instances.len(),
        };
        self.instances.push(ObjectInstance::new(handle, category, name, ts));
        let index = self.instances.len() - 1;
        &mut self.instances[index]
    }

    /// Start a new instance at `ts`
    ///
    /// Fails while the previous instance is alive, or when `ts` precedes its
    /// deletion.
    pub fn id_was_created(&mut self, category: &str, name: &str, ts: Timestamp) -> Result<&ObjectInstance> {
        if let Some(last) = self.instances.last() {
            if !last.is_deleted() {
                return Err(ModelError::ordering(
                    self.id.as_str(),
                    ts,
                    OrderingKind::CreateBeforeDelete,
                ));
            }
            if ts < last.deletion_ts() {
                return Err(ModelError::ordering(
                    self.id.as_str(),
                    ts,
                    OrderingKind::CreateBeforePriorDeletion {
                        deletion_ts: last.deletion_ts(),
                    },
                ));
            }
        }
        debug!(id = %self.id, %ts, cycle = self.instances.len(), "object created");
        Ok(self.push_instance(category, name, ts))
    }

    /// Record a snapshot at `ts`, starting an instance implicitly when none is
    /// alive
    pub fn add_snapshot(
        &mut self,
        category: &str,
        name: &str,
        ts: Timestamp,
        args: Value,
    ) -> Result<SnapshotHandle> {
        let starts_new_cycle = match self.instances.last() {
            None => true,
            Some(last) => {
                if ts < last.creation_ts() {
                    return Err(ModelError::ordering(
                        self.id.as_str(),
                        ts,
                        OrderingKind::SnapshotBeforeCreation {
                            creation_ts: last.creation_ts(),
                        },
                    ));
                }
                last.is_deleted() && ts >= last.deletion_ts()
            }
        };

        let instance = if starts_new_cycle {
            debug!(id = %self.id, %ts, cycle = self.instances.len(), "object created implicitly by snapshot");
            self.push_instance(category, name, ts)
        } else {
            let index = self.instances.len() - 1;
            let instance = &mut self.instances[index];
            instance.check_identity(category, name)?;
            instance
        };

        let snapshot = instance.add_snapshot(ts, args)?;
        Ok(snapshot.handle().clone())
    }

    /// Close the live instance at `ts`
    ///
    /// A delete for an id never seen before creates an instance at `ts` and
    /// closes it immediately. A repeated delete at or after the recorded
    /// deletion is ignored.
    pub fn id_was_deleted(&mut self, category: &str, name: &str, ts: Timestamp) -> Result<&ObjectInstance> {
        if self.instances.is_empty() {
            debug!(id = %self.id, %ts, "delete of an id that was never created");
            self.push_instance(category, name, ts);
        }
        let index = self.instances.len() - 1;
        let last = &mut self.instances[index];

        if ts < last.creation_ts() {
            return Err(ModelError::ordering(
                self.id.as_str(),
                ts,
                OrderingKind::DeleteBeforeCreation {
                    creation_ts: last.creation_ts(),
                },
            ));
        }

        if last.is_deleted() {
            if ts < last.deletion_ts() {
                return Err(ModelError::ordering(
                    self.id.as_str(),
                    ts,
                    OrderingKind::DeleteBeforePriorDeletion {
                        deletion_ts: last.deletion_ts(),
                    },
                ));
            }
            debug!(id = %self.id, %ts, "ignoring repeated delete");
            return Ok(&self.instances[index]);
        }

        last.check_identity(category, name)?;
        last.was_deleted(ts)?;
        debug!(id = %self.id, %ts, "object deleted");
        Ok(&self.instances[index])
    }

    /// Instance alive at `ts`, searching `[creation_ts, deletion_ts)`
    ///
    /// `None` before the first creation, in a gap between instances, or after
    /// the last deletion.
    pub fn get_instance_at(&self, ts: Timestamp) -> Option<&ObjectInstance> {
        let candidate = self.get_instance_at_or_before(ts)?;
        candidate.is_alive_at(ts).then_some(candidate)
    }

    /// Latest instance created at or before `ts`, alive or not
    pub fn get_instance_at_or_before(&self, ts: Timestamp) -> Option<&ObjectInstance> {
        let index = self.instances.partition_point(|i| i.creation_ts() <= ts);
        index.checked_sub(1).map(|i| &self.instances[i])
    }

    pub(crate) fn instances_mut(&mut self) -> &mut [ObjectInstance] {
        &mut self.instances
    }

    pub(crate) fn instance_mut(&mut self, index: usize) -> Option<&mut ObjectInstance> {
        self.instances.get_mut(index)
    }

    pub(crate) fn shift_timestamps_forward(&mut self, amount: i64) {
        for instance in &mut self.instances {
            instance.shift_timestamps_forward(amount);
        }
    }
}
