//! Process hierarchy: threads, counters and objects of one address space
//!
//! `ProcessBase` holds everything a process and the kernel have in common.
//! Its bounds are a bottom-up fold: every child updates its own range
//! first, then the base folds the children in. Timestamp shifts go the
//! other way, from the base down to every leaf, in a single call.

use crate::counter::{counter_key, Counter};
use crate::object_collection::ObjectCollection;
use crate::payload::PayloadRegistry;
use crate::range::Range;
use crate::thread::Thread;
use crate::timestamp::Timestamp;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Threads, counters and objects shared by processes and the kernel
#[derive(Debug, Clone)]
pub struct ProcessBase {
    threads: BTreeMap<i64, Thread>,
    counters: BTreeMap<String, Counter>,
    objects: ObjectCollection,
    bounds: Range,
}

impl Default for ProcessBase {
    fn default() -> Self {
        Self::new(Arc::new(PayloadRegistry::with_builtin_decoders()))
    }
}

impl ProcessBase {
    pub fn new(registry: Arc<PayloadRegistry>) -> Self {
        ProcessBase {
            threads: BTreeMap::new(),
            counters: BTreeMap::new(),
            objects: ObjectCollection::with_registry(registry),
            bounds: Range::new(),
        }
    }

    /// Threads ordered by tid
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn thread(&self, tid: i64) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn get_or_create_thread(&mut self, tid: i64) -> &mut Thread {
        self.threads.entry(tid).or_insert_with(|| Thread::new(tid))
    }

    /// Counters ordered by `category.name`
    pub fn counters(&self) -> impl Iterator<Item = &Counter> {
        self.counters.values()
    }

    pub fn counter(&self, category: &str, name: &str) -> Option<&Counter> {
        self.counters.get(&counter_key(category, name))
    }

    pub fn get_or_create_counter(&mut self, category: &str, name: &str) -> &mut Counter {
        self.counters
            .entry(counter_key(category, name))
            .or_insert_with(|| Counter::new(category, name))
    }

    pub fn objects(&self) -> &ObjectCollection {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectCollection {
        &mut self.objects
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for thread in self.threads.values_mut() {
            thread.update_bounds();
            self.bounds.add_range(thread.bounds());
        }
        for counter in self.counters.values_mut() {
            counter.update_bounds();
            self.bounds.add_range(counter.bounds());
        }
        self.objects.update_bounds();
        self.bounds.add_range(self.objects.bounds());
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for thread in self.threads.values_mut() {
            thread.shift_timestamps_forward(amount);
        }
        for counter in self.counters.values_mut() {
            counter.shift_timestamps_forward(amount);
        }
        self.objects.shift_timestamps_forward(amount);
    }

    /// Drop threads that never received a slice; returns how many went
    pub fn prune_empty_threads(&mut self) -> usize {
        let before = self.threads.len();
        self.threads.retain(|_, thread| !thread.is_empty());
        before - self.threads.len()
    }

    pub fn find_all_threads_named(&self, name: &str) -> Vec<&Thread> {
        self.threads
            .values()
            .filter(|thread| thread.name() == Some(name))
            .collect()
    }

    pub fn auto_close_open_slices(&mut self, max_ts: Option<Timestamp>) -> usize {
        self.threads
            .values_mut()
            .map(|thread| thread.slice_group_mut().auto_close_open_slices(max_ts))
            .sum()
    }

    pub fn create_sub_slices(&mut self) {
        for thread in self.threads.values_mut() {
            thread.slice_group_mut().create_sub_slices();
        }
    }

    /// Resolve `id_ref`s in slice args and snapshot args against this
    /// process's objects; returns the number of references resolved
    pub fn join_object_refs(&mut self) -> usize {
        let mut total = 0;
        let objects = &self.objects;
        for thread in self.threads.values_mut() {
            for slice in thread.slice_group_mut().slices_mut() {
                slice.object_refs = objects.find_id_refs(&slice.args, slice.start);
                total += slice.object_refs.len();
            }
        }
        total += self.objects.join_object_refs();
        debug!(total, "joined object references");
        total
    }

    pub fn add_categories_to(&self, categories: &mut BTreeSet<String>) {
        for thread in self.threads.values() {
            thread.add_categories_to(categories);
        }
        for counter in self.counters.values() {
            if !categories.contains(counter.category()) {
                categories.insert(counter.category().to_string());
            }
        }
        self.objects.add_categories_to(categories);
    }
}

/// A traced user-space process
#[derive(Debug, Clone)]
pub struct Process {
    pid: i64,
    name: Option<String>,
    labels: Vec<String>,
    sort_index: i64,
    base: ProcessBase,
}

impl Process {
    pub fn new(pid: i64, registry: Arc<PayloadRegistry>) -> Self {
        Process {
            pid,
            name: None,
            labels: Vec::new(),
            sort_index: 0,
            base: ProcessBase::new(registry),
        }
    }

    pub fn pid(&self) -> i64 {
        self.pid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Add a label unless it is already present
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    pub fn sort_index(&self) -> i64 {
        self.sort_index
    }

    pub fn set_sort_index(&mut self, sort_index: i64) {
        self.sort_index = sort_index;
    }

    pub fn base(&self) -> &ProcessBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ProcessBase {
        &mut self.base
    }

    pub fn objects(&self) -> &ObjectCollection {
        self.base.objects()
    }

    pub fn objects_mut(&mut self) -> &mut ObjectCollection {
        self.base.objects_mut()
    }

    pub fn bounds(&self) -> &Range {
        self.base.bounds()
    }
}

/// Threads and counters that belong to no user-space process
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    base: ProcessBase,
}

impl Kernel {
    pub fn new(registry: Arc<PayloadRegistry>) -> Self {
        Kernel {
            base: ProcessBase::new(registry),
        }
    }

    pub fn base(&self) -> &ProcessBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ProcessBase {
        &mut self.base
    }

    pub fn bounds(&self) -> &Range {
        self.base.bounds()
    }
}
