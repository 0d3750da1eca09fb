//! Per-scope registry of object identifiers
//!
//! An `ObjectCollection` belongs to one process. It maps each id ever seen in
//! that process to its `TimeToObjectInstanceMap`, creating the map lazily on
//! first reference, and answers "which snapshot did this id have at `ts`".
//!
//! Besides the ingestion surface it runs the post-import passes that work on
//! snapshot args: implicit snapshot extraction, `id_ref` resolution and
//! payload initialization.

use crate::error::{ModelError, Result};
use crate::object_id::ObjectId;
use crate::object_instance::ObjectInstance;
use crate::object_snapshot::{IdRef, InstanceHandle, ObjectSnapshot, SnapshotHandle};
use crate::payload::{PayloadError, PayloadRegistry};
use crate::range::Range;
use crate::time_to_object_instance_map::TimeToObjectInstanceMap;
use crate::timestamp::Timestamp;
use fnv::FnvHashMap;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// All object instances of one process, keyed by id
#[derive(Debug, Clone)]
pub struct ObjectCollection {
    instance_maps: FnvHashMap<ObjectId, TimeToObjectInstanceMap>,
    registry: Arc<PayloadRegistry>,
    bounds: Range,
}

impl Default for ObjectCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCollection {
    /// Empty collection using the built-in payload decoders
    pub fn new() -> Self {
        Self::with_registry(Arc::new(PayloadRegistry::with_builtin_decoders()))
    }

    pub fn with_registry(registry: Arc<PayloadRegistry>) -> Self {
        ObjectCollection {
            instance_maps: FnvHashMap::default(),
            registry,
            bounds: Range::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PayloadRegistry> {
        &self.registry
    }

    fn map_for(&mut self, id: &str) -> &mut TimeToObjectInstanceMap {
        // Reuse the stored key so known ids don't allocate
        let key = match self.instance_maps.get_key_value(id) {
            Some((key, _)) => key.clone(),
            None => ObjectId::from(id),
        };
        self.instance_maps
            .entry(key.clone())
            .or_insert_with(|| TimeToObjectInstanceMap::new(key))
    }

    pub fn id_was_created(&mut self, id: &str, category: &str, name: &str, ts: Timestamp) -> Result<&ObjectInstance> {
        self.map_for(id).id_was_created(category, name, ts)
    }

    pub fn add_snapshot(
        &mut self,
        id: &str,
        category: &str,
        name: &str,
        ts: Timestamp,
        args: Value,
    ) -> Result<SnapshotHandle> {
        self.map_for(id).add_snapshot(category, name, ts, args)
    }

    pub fn id_was_deleted(&mut self, id: &str, category: &str, name: &str, ts: Timestamp) -> Result<&ObjectInstance> {
        self.map_for(id).id_was_deleted(category, name, ts)
    }

    /// Reuse history of `id`, if it was ever seen
    pub fn instance_map(&self, id: &str) -> Option<&TimeToObjectInstanceMap> {
        self.instance_maps.get(id)
    }

    /// Instance of `id` alive at `ts` (half-open lifetime)
    pub fn get_object_instance_at(&self, id: &str, ts: Timestamp) -> Option<&ObjectInstance> {
        self.instance_maps.get(id)?.get_instance_at(ts)
    }

    /// Snapshot of `id` current at `ts`
    ///
    /// Picks the latest instance created at or before `ts` and queries it.
    /// `Ok(None)` for an unknown id, a `ts` before the first creation, or a
    /// `ts` before that instance's first snapshot. A `ts` past the picked
    /// instance's deletion is an `OutOfRangeQuery`.
    pub fn get_snapshot_at(&self, id: &str, ts: Timestamp) -> Result<Option<&ObjectSnapshot>> {
        let Some(instance) = self
            .instance_maps
            .get(id)
            .and_then(|map| map.get_instance_at_or_before(ts))
        else {
            return Ok(None);
        };
        instance.get_snapshot_at(ts)
    }

    pub fn instance(&self, handle: &InstanceHandle) -> Option<&ObjectInstance> {
        self.instance_maps
            .get(&handle.id)?
            .instances()
            .get(handle.index)
    }

    pub fn snapshot(&self, handle: &SnapshotHandle) -> Option<&ObjectSnapshot> {
        self.instance(&handle.instance)?.snapshots().get(handle.index)
    }

    fn instance_mut(&mut self, handle: &InstanceHandle) -> Option<&mut ObjectInstance> {
        self.instance_maps.get_mut(&handle.id)?.instance_mut(handle.index)
    }

    fn snapshot_mut(&mut self, handle: &SnapshotHandle) -> Option<&mut ObjectSnapshot> {
        self.instance_mut(&handle.instance)?.snapshot_mut(handle.index)
    }

    /// Number of distinct ids
    pub fn len(&self) -> usize {
        self.instance_maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_maps.is_empty()
    }

    /// Every instance, in no particular order
    pub fn iter_object_instances(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.instance_maps.values().flat_map(|map| map.instances())
    }

    /// Every instance ordered by creation time, then id
    pub fn get_all_object_instances(&self) -> Vec<&ObjectInstance> {
        let mut instances: Vec<&ObjectInstance> = self.iter_object_instances().collect();
        instances.sort_by(|a, b| {
            a.creation_ts()
                .cmp(&b.creation_ts())
                .then_with(|| a.handle().cmp(b.handle()))
        });
        instances
    }

    /// Instances grouped by type name, each group ordered by creation time
    pub fn get_all_instances_by_type_name(&self) -> BTreeMap<String, Vec<&ObjectInstance>> {
        let mut by_type: BTreeMap<String, Vec<&ObjectInstance>> = BTreeMap::new();
        for instance in self.get_all_object_instances() {
            by_type
                .entry(instance.type_name().to_string())
                .or_default()
                .push(instance);
        }
        by_type
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    /// Recompute bounds from every instance's own bounds
    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for map in self.instance_maps.values() {
            for instance in map.instances() {
                self.bounds.add_range(&instance.bounds());
            }
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for map in self.instance_maps.values_mut() {
            map.shift_timestamps_forward(amount);
        }
    }

    pub fn add_categories_to(&self, categories: &mut BTreeSet<String>) {
        for instance in self.iter_object_instances() {
            if !categories.contains(instance.category()) {
                categories.insert(instance.category().to_string());
            }
        }
    }

    /// Close every instance still alive at the end of the trace
    ///
    /// Each instance is closed at `max_ts`, or at its own last timestamp if
    /// that is later. Returns the number of instances closed.
    pub fn auto_delete_objects(&mut self, max_ts: Timestamp) -> usize {
        let mut closed = 0;
        for map in self.instance_maps.values_mut() {
            for instance in map.instances_mut() {
                if instance.is_deleted() {
                    continue;
                }
                let end = instance.bounds().max().map_or(max_ts, |last| last.max(max_ts));
                // `end` is past creation and every snapshot, so this cannot fail
                if instance.was_deleted(end).is_ok() {
                    closed += 1;
                }
            }
        }
        debug!(closed, %max_ts, "auto-deleted open objects");
        closed
    }

    /// Run the payload pipeline over every snapshot
    ///
    /// The decoder is resolved once per (category, type name). Snapshots
    /// whose args fail to decode keep `payload() == None`; their failures
    /// are returned.
    pub fn initialize_objects(&mut self) -> Vec<(SnapshotHandle, PayloadError)> {
        let registry = Arc::clone(&self.registry);
        let mut decoders = HashMap::new();
        let mut failures = Vec::new();

        for map in self.instance_maps.values_mut() {
            for instance in map.instances_mut() {
                let key = (instance.category().to_string(), instance.type_name().to_string());
                let decoder = decoders
                    .entry(key)
                    .or_insert_with_key(|(category, type_name)| registry.resolve(category, type_name))
                    .clone();
                for snapshot in instance.snapshots_mut() {
                    match decoder.initialize(snapshot.args()) {
                        Ok(payload) => snapshot.set_payload(payload),
                        Err(e) => failures.push((snapshot.handle().clone(), e)),
                    }
                }
            }
        }
        debug!(decoders = decoders.len(), failures = failures.len(), "initialized object payloads");
        failures
    }

    /// Turn nested `{"id": "TypeName/0x..", ...}` objects into snapshots
    ///
    /// Every such object inside a snapshot's args becomes a snapshot of the
    /// id after the last `/`, typed by the part before it, taken at the
    /// containing snapshot's timestamp. Containing snapshots are visited in
    /// timestamp order. Once its snapshot is added, the nested object is
    /// replaced in place by `{"id_ref": "0x.."}`; a rejected one is left as
    /// it was. Its category is its own `cat` field when present, otherwise
    /// the containing instance's category.
    ///
    /// Failures do not stop the pass; they are returned.
    pub fn extract_implicit_snapshots(&mut self) -> Vec<ModelError> {
        let mut containers: Vec<(Timestamp, SnapshotHandle)> = self
            .get_all_object_instances()
            .into_iter()
            .flat_map(|instance| {
                instance
                    .snapshots()
                    .iter()
                    .map(|s| (s.ts(), s.handle().clone()))
            })
            .collect();
        containers.sort_by_key(|(ts, _)| *ts);

        let mut errors = Vec::new();
        for (ts, container) in containers {
            let (Some(instance), Some(snapshot)) = (
                self.instance(&container.instance),
                self.snapshot(&container),
            ) else {
                continue;
            };
            if snapshot.args().get("id").is_some() {
                errors.push(ModelError::IdFieldInArgs {
                    id: container.instance.id.to_string(),
                    ts,
                });
                continue;
            }
            let category = instance.category().to_string();

            let mut found = Vec::new();
            find_implicit_objects(snapshot.args(), &mut String::new(), &mut found, &mut errors);

            for implicit in found {
                if let Err(e) = self.extract_implicit_object(&container, ts, &category, implicit) {
                    errors.push(e);
                }
            }
        }
        errors
    }

    fn extract_implicit_object(
        &mut self,
        container: &SnapshotHandle,
        ts: Timestamp,
        category: &str,
        implicit: ImplicitObject,
    ) -> Result<()> {
        let Some(mut args) = self
            .snapshot(container)
            .and_then(|s| s.args().pointer(&implicit.pointer))
            .cloned()
        else {
            return Ok(());
        };
        if let Value::Object(map) = &mut args {
            map.remove("id");
        }
        let category = args
            .get("cat")
            .and_then(Value::as_str)
            .unwrap_or(category)
            .to_string();

        let created = self.add_snapshot(&implicit.id, &category, &implicit.type_name, ts, args)?;
        if let Some(instance) = self.instance_mut(&created.instance) {
            instance.mark_has_implicit_snapshots();
        }
        if let Some(snapshot) = self.snapshot_mut(&created) {
            snapshot.set_containing_snapshot(container.clone());
        }
        if let Some(slot) = self
            .snapshot_mut(container)
            .and_then(|s| s.args_mut().pointer_mut(&implicit.pointer))
        {
            *slot = json!({ "id_ref": &implicit.id });
        }
        trace!(id = %implicit.id, %ts, "extracted implicit snapshot");
        Ok(())
    }

    /// Resolve every `id_ref`/`idRef` field in `args` against this collection
    ///
    /// Each reference is resolved to the snapshot of the referenced id
    /// current at `ts`. Unresolvable references are skipped.
    pub fn find_id_refs(&self, args: &Value, ts: Timestamp) -> Vec<IdRef> {
        let mut refs = Vec::new();
        let mut pointer = String::new();
        self.collect_id_refs(args, ts, &mut pointer, &mut refs);
        refs
    }

    fn collect_id_refs(&self, value: &Value, ts: Timestamp, pointer: &mut String, refs: &mut Vec<IdRef>) {
        match value {
            Value::Object(map) => {
                if let Some(id) = id_ref_of(value) {
                    if let Ok(Some(snapshot)) = self.get_snapshot_at(id, ts) {
                        refs.push(IdRef {
                            pointer: pointer.clone(),
                            target: snapshot.handle().clone(),
                        });
                    }
                }
                for (key, child) in map {
                    let len = pointer.len();
                    pointer.push('/');
                    push_pointer_token(pointer, key);
                    self.collect_id_refs(child, ts, pointer, refs);
                    pointer.truncate(len);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    let len = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&index.to_string());
                    self.collect_id_refs(child, ts, pointer, refs);
                    pointer.truncate(len);
                }
            }
            _ => {}
        }
    }

    /// Resolve the `id_ref`s of every snapshot; returns how many were found
    pub fn join_object_refs(&mut self) -> usize {
        let resolved: Vec<(SnapshotHandle, Vec<IdRef>)> = self
            .iter_object_instances()
            .flat_map(|instance| instance.snapshots())
            .map(|snapshot| (snapshot.handle().clone(), self.find_id_refs(snapshot.args(), snapshot.ts())))
            .filter(|(_, refs)| !refs.is_empty())
            .collect();

        let mut total = 0;
        for (handle, refs) in resolved {
            total += refs.len();
            if let Some(snapshot) = self.snapshot_mut(&handle) {
                snapshot.set_refs(refs);
            }
        }
        total
    }
}

/// Target id of an `{"id_ref": ..}` or `{"idRef": ..}` object
pub(crate) fn id_ref_of(value: &Value) -> Option<&str> {
    value
        .get("id_ref")
        .or_else(|| value.get("idRef"))
        .and_then(Value::as_str)
}

/// Append one RFC 6901 reference token
fn push_pointer_token(pointer: &mut String, token: &str) {
    for c in token.chars() {
        match c {
            '~' => pointer.push_str("~0"),
            '/' => pointer.push_str("~1"),
            c => pointer.push(c),
        }
    }
}

/// Split `"cc::PictureLayerImpl/0x7b43"` into type name and id
fn split_implicit_id(raw_id: &str) -> Option<(&str, &str)> {
    raw_id
        .rsplit_once('/')
        .filter(|(type_name, id)| !type_name.is_empty() && !id.is_empty())
}

/// A nested object found at `pointer` inside a snapshot's args
struct ImplicitObject {
    pointer: String,
    type_name: String,
    id: String,
}

/// Collect nested implicit objects, innermost first
fn find_implicit_objects(
    value: &Value,
    pointer: &mut String,
    found: &mut Vec<ImplicitObject>,
    errors: &mut Vec<ModelError>,
) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let len = pointer.len();
                pointer.push('/');
                push_pointer_token(pointer, key);
                find_in_child(child, pointer, found, errors);
                pointer.truncate(len);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&index.to_string());
                find_in_child(child, pointer, found, errors);
                pointer.truncate(len);
            }
        }
        _ => {}
    }
}

fn find_in_child(
    child: &Value,
    pointer: &mut String,
    found: &mut Vec<ImplicitObject>,
    errors: &mut Vec<ModelError>,
) {
    let Some(raw_id) = child.get("id").and_then(Value::as_str) else {
        find_implicit_objects(child, pointer, found, errors);
        return;
    };
    let Some((type_name, id)) = split_implicit_id(raw_id) else {
        errors.push(ModelError::UnnamedImplicitSnapshot {
            raw_id: raw_id.to_string(),
        });
        return;
    };

    // Nested objects become snapshots of their own
    find_implicit_objects(child, pointer, found, errors);

    found.push(ImplicitObject {
        pointer: pointer.clone(),
        type_name: type_name.to_string(),
        id: id.to_string(),
    });
}
