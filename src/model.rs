//! The trace model: kernel, processes and cpus on one timeline
//!
//! Importers fill the model through the process hierarchy and record every
//! rejected event as an `ImportWarning`. `finalize` then runs the
//! post-import passes in a fixed order:
//!
//! 1. update bounds
//! 2. close slices still open at the end of the trace
//! 3. derive slice nesting
//! 4. split implicit snapshots out of snapshot args
//! 5. prune empty threads
//! 6. update bounds and collect categories
//! 7. shift the world so the first timestamp is zero
//! 8. resolve `id_ref`s
//! 9. close objects still alive at the end of the trace
//! 10. decode typed snapshot payloads
//!
//! Steps 2, 4, 5 and 7 to 10 can be switched off through `ModelConfig`.

use crate::config::ModelConfig;
use crate::counter::Counter;
use crate::cpu::Cpu;
use crate::payload::PayloadRegistry;
use crate::process::{Kernel, Process, ProcessBase};
use crate::range::Range;
use crate::thread::Thread;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A problem found while importing, kept with the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportWarning {
    /// Stable short kind, e.g. `object_parse_error`
    pub kind: String,
    pub message: String,
}

/// What `finalize` did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub auto_closed_slices: usize,
    pub pruned_threads: usize,
    pub implicit_snapshot_errors: usize,
    /// Amount every timestamp was shifted by, in nanoseconds
    pub shifted_by_nanos: i64,
    pub resolved_refs: usize,
    pub auto_deleted_objects: usize,
    pub payload_failures: usize,
}

/// Complete model of one trace
#[derive(Debug, Clone)]
pub struct TraceModel {
    config: ModelConfig,
    registry: Arc<PayloadRegistry>,
    kernel: Kernel,
    processes: BTreeMap<i64, Process>,
    cpus: BTreeMap<u32, Cpu>,
    bounds: Range,
    categories: BTreeSet<String>,
    import_warnings: Vec<ImportWarning>,
    reported_warning_kinds: HashSet<String>,
}

impl Default for TraceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceModel {
    /// Empty model with the default config and built-in payload decoders
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    pub fn with_config(config: ModelConfig) -> Self {
        Self::with_registry(config, Arc::new(PayloadRegistry::with_builtin_decoders()))
    }

    /// Every object collection of the model decodes payloads with `registry`
    pub fn with_registry(config: ModelConfig, registry: Arc<PayloadRegistry>) -> Self {
        TraceModel {
            config,
            kernel: Kernel::new(Arc::clone(&registry)),
            registry,
            processes: BTreeMap::new(),
            cpus: BTreeMap::new(),
            bounds: Range::new(),
            categories: BTreeSet::new(),
            import_warnings: Vec::new(),
            reported_warning_kinds: HashSet::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PayloadRegistry> {
        &self.registry
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn process(&self, pid: i64) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_or_create_process(&mut self, pid: i64) -> &mut Process {
        let registry = &self.registry;
        self.processes
            .entry(pid)
            .or_insert_with(|| Process::new(pid, Arc::clone(registry)))
    }

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn cpu(&self, cpu_number: u32) -> Option<&Cpu> {
        self.cpus.get(&cpu_number)
    }

    pub fn get_or_create_cpu(&mut self, cpu_number: u32) -> &mut Cpu {
        self.cpus
            .entry(cpu_number)
            .or_insert_with(|| Cpu::new(cpu_number))
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    /// Categories seen in slices, counters and objects, without `""`
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn import_warnings(&self) -> &[ImportWarning] {
        &self.import_warnings
    }

    pub fn has_import_warnings(&self) -> bool {
        !self.import_warnings.is_empty()
    }

    /// Record an import warning
    ///
    /// Every warning is kept; only the first of each kind is logged.
    pub fn import_warning(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        let warning = ImportWarning {
            kind: kind.into(),
            message: message.into(),
        };
        if self.reported_warning_kinds.insert(warning.kind.clone()) {
            warn!(kind = %warning.kind, "{}", warning.message);
        } else {
            debug!(kind = %warning.kind, "{}", warning.message);
        }
        self.import_warnings.push(warning);
    }

    fn bases(&self) -> impl Iterator<Item = &ProcessBase> {
        std::iter::once(self.kernel.base()).chain(self.processes.values().map(Process::base))
    }

    fn bases_mut(&mut self) -> impl Iterator<Item = &mut ProcessBase> {
        std::iter::once(self.kernel.base_mut()).chain(self.processes.values_mut().map(Process::base_mut))
    }

    pub fn update_bounds(&mut self) {
        let mut bounds = Range::new();
        for base in self.bases_mut() {
            base.update_bounds();
            bounds.add_range(base.bounds());
        }
        for cpu in self.cpus.values_mut() {
            cpu.update_bounds();
            bounds.add_range(cpu.bounds());
        }
        self.bounds = bounds;
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        for base in self.bases_mut() {
            base.shift_timestamps_forward(amount);
        }
        for cpu in self.cpus.values_mut() {
            cpu.shift_timestamps_forward(amount);
        }
    }

    /// Shift everything so the earliest timestamp becomes zero
    ///
    /// Returns the applied shift; zero for an empty model. The shift
    /// saturates, so a world starting at `i64::MIN` ends up starting at -1ns.
    pub fn shift_world_to_zero(&mut self) -> i64 {
        let Some(min) = self.bounds.min() else {
            return 0;
        };
        let amount = min.as_nanos().saturating_neg();
        self.shift_timestamps_forward(amount);
        self.update_bounds();
        amount
    }

    fn update_categories(&mut self) {
        let mut categories = BTreeSet::new();
        for base in self.bases() {
            base.add_categories_to(&mut categories);
        }
        for cpu in self.cpus.values() {
            cpu.add_categories_to(&mut categories);
        }
        categories.remove("");
        self.categories = categories;
    }

    /// Kernel threads first, then each process's threads by pid and tid
    pub fn get_all_threads(&self) -> Vec<&Thread> {
        self.bases().flat_map(ProcessBase::threads).collect()
    }

    pub fn get_all_processes(&self) -> Vec<&Process> {
        self.processes.values().collect()
    }

    pub fn get_all_cpus(&self) -> Vec<&Cpu> {
        self.cpus.values().collect()
    }

    /// Counters of the kernel, every process and every cpu
    pub fn get_all_counters(&self) -> Vec<&Counter> {
        self.bases()
            .flat_map(ProcessBase::counters)
            .chain(self.cpus.values().flat_map(Cpu::counters))
            .collect()
    }

    pub fn find_all_threads_named(&self, name: &str) -> Vec<&Thread> {
        self.bases()
            .flat_map(|base| base.find_all_threads_named(name))
            .collect()
    }

    /// Run the post-import passes configured in `ModelConfig`
    pub fn finalize(&mut self) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        self.update_bounds();

        if self.config.auto_close_open_slices {
            let max_ts = self.bounds.max();
            report.auto_closed_slices = self
                .bases_mut()
                .map(|base| base.auto_close_open_slices(max_ts))
                .sum();
        }

        for base in self.bases_mut() {
            base.create_sub_slices();
        }
        for cpu in self.cpus.values_mut() {
            cpu.slices_mut().create_sub_slices();
        }

        if self.config.extract_implicit_snapshots {
            let errors: Vec<_> = self
                .bases_mut()
                .flat_map(|base| base.objects_mut().extract_implicit_snapshots())
                .collect();
            report.implicit_snapshot_errors = errors.len();
            for e in errors {
                self.import_warning("object_snapshot_parse_error", format!("While processing implicit snapshot: {}", e));
            }
        }

        if self.config.prune_empty_threads {
            report.pruned_threads = self.bases_mut().map(ProcessBase::prune_empty_threads).sum();
        }

        self.update_bounds();
        self.update_categories();

        if self.config.shift_world_to_zero {
            report.shifted_by_nanos = self.shift_world_to_zero();
        }

        if self.config.join_object_refs {
            report.resolved_refs = self.bases_mut().map(ProcessBase::join_object_refs).sum();
        }

        if self.config.auto_delete_objects {
            if let Some(max_ts) = self.bounds.max() {
                report.auto_deleted_objects = self
                    .bases_mut()
                    .map(|base| base.objects_mut().auto_delete_objects(max_ts))
                    .sum();
            }
        }

        if self.config.initialize_payloads {
            let failures: Vec<_> = self
                .bases_mut()
                .flat_map(|base| base.objects_mut().initialize_objects())
                .collect();
            report.payload_failures = failures.len();
            for (handle, e) in failures {
                self.import_warning(
                    "object_payload_error",
                    format!("While initializing snapshot {} of {}: {}", handle.index, handle.instance.id, e),
                );
            }
        }

        self.update_bounds();
        info!(
            processes = self.processes.len(),
            cpus = self.cpus.len(),
            warnings = self.import_warnings.len(),
            "trace model finalized"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Slice;
    use crate::timestamp::Timestamp;
    use serde_json::json;

    fn ts(nanos: i64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    // Test 1: World bounds fold kernel, processes and cpus
    #[test]
    fn test_update_bounds() {
        let mut model = TraceModel::new();
        model
            .get_or_create_process(1)
            .base_mut()
            .get_or_create_thread(1)
            .slice_group_mut()
            .push_slice(Slice::new("cat", "a", ts(100), 50, json!({})))
            .unwrap();
        model
            .get_or_create_cpu(0)
            .slices_mut()
            .push_slice(Slice::new("sched", "b", ts(20), 10, json!({})))
            .unwrap();
        model.update_bounds();
        assert_eq!(model.bounds().min(), Some(ts(20)));
        assert_eq!(model.bounds().max(), Some(ts(150)));
    }

    // Test 2: Warnings are all kept
    #[test]
    fn test_import_warnings_are_kept() {
        let mut model = TraceModel::new();
        model.import_warning("object_parse_error", "first");
        model.import_warning("object_parse_error", "second");
        model.import_warning("parse_error", "third");
        assert_eq!(model.import_warnings().len(), 3);
        assert_eq!(model.import_warnings()[1].message, "second");
    }

    // Test 3: Shift to zero moves every leaf
    #[test]
    fn test_shift_world_to_zero() {
        let mut model = TraceModel::new();
        let process = model.get_or_create_process(7);
        process
            .objects_mut()
            .add_snapshot("0x1", "cc", "Layer", ts(1_000), json!({}))
            .unwrap();
        process
            .base_mut()
            .get_or_create_counter("mem", "heap")
            .get_or_add_series("used")
            .add_sample(ts(1_500), 3.0)
            .unwrap();
        model.update_bounds();

        assert_eq!(model.shift_world_to_zero(), -1_000);
        assert_eq!(model.bounds().min(), Some(ts(0)));
        assert_eq!(model.bounds().max(), Some(ts(500)));
        let snapshot = model
            .process(7)
            .unwrap()
            .objects()
            .get_snapshot_at("0x1", ts(0))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.ts(), ts(0));
    }

    #[test]
    fn test_finalize_with_earliest_possible_timestamp() {
        let mut model = TraceModel::new();
        model
            .get_or_create_process(1)
            .base_mut()
            .get_or_create_counter("mem", "heap")
            .get_or_add_series("used")
            .add_sample(Timestamp::from_nanos(i64::MIN), 1.0)
            .unwrap();

        let report = model.finalize();
        assert_eq!(report.shifted_by_nanos, i64::MAX);
        assert_eq!(model.bounds().min(), Some(ts(-1)));
    }

    #[test]
    fn test_shift_empty_world() {
        let mut model = TraceModel::new();
        model.update_bounds();
        assert_eq!(model.shift_world_to_zero(), 0);
        assert!(model.bounds().is_empty());
    }

    // Test 4: Full finalize pass
    #[test]
    fn test_finalize() {
        let mut model = TraceModel::new();
        let process = model.get_or_create_process(1);
        process.set_name("renderer");
        let base = process.base_mut();
        base.get_or_create_thread(1);
        base.get_or_create_thread(2)
            .slice_group_mut()
            .begin_slice("cc", "DrawFrame", ts(1_000), json!({"host": {"id_ref": "0x100"}}));
        base.objects_mut()
            .add_snapshot(
                "0x100",
                "cc",
                "cc::LayerTreeHostImpl",
                ts(1_000),
                json!({
                    "device_viewport_size": {"width": 800, "height": 600},
                    "tiles": [{"id": "cc::Tile/0x200", "contents_scale": 1.0}]
                }),
            )
            .unwrap();
        base.objects_mut()
            .add_snapshot("0x300", "", "Unnamed", ts(2_000), json!({}))
            .unwrap();

        let report = model.finalize();
        assert_eq!(report.auto_closed_slices, 1);
        assert_eq!(report.pruned_threads, 1);
        assert_eq!(report.implicit_snapshot_errors, 0);
        assert_eq!(report.shifted_by_nanos, -1_000);
        assert_eq!(report.auto_deleted_objects, 3);
        assert_eq!(report.payload_failures, 0);
        assert!(report.resolved_refs >= 2);

        assert_eq!(model.bounds().min(), Some(ts(0)));
        assert_eq!(model.bounds().max(), Some(ts(1_000)));
        assert_eq!(model.categories().iter().collect::<Vec<_>>(), vec!["cc"]);

        let threads = model.get_all_threads();
        assert_eq!(threads.len(), 1);
        let slice = &threads[0].slice_group().slices()[0];
        assert!(slice.did_not_finish);
        assert_eq!(slice.object_refs.len(), 1);

        let objects = model.process(1).unwrap().objects();
        let tile = objects.get_snapshot_at("0x200", ts(0)).unwrap().unwrap();
        assert!(matches!(tile.payload(), Some(crate::payload::SnapshotPayload::Tile(_))));
        assert!(!model.has_import_warnings());
    }

    // Test 5: Preserving config leaves the timeline alone
    #[test]
    fn test_finalize_preserving() {
        let mut model = TraceModel::with_config(ModelConfig::preserving());
        let base = model.get_or_create_process(1).base_mut();
        base.get_or_create_thread(9);
        base.objects_mut()
            .id_was_created("0x1", "cc", "Layer", ts(500))
            .unwrap();

        let report = model.finalize();
        assert_eq!(report.shifted_by_nanos, 0);
        assert_eq!(report.auto_deleted_objects, 0);
        assert_eq!(model.get_all_threads().len(), 1);
        let instance = model
            .process(1)
            .unwrap()
            .objects()
            .get_object_instance_at("0x1", ts(10_000))
            .unwrap();
        assert_eq!(instance.creation_ts(), ts(500));
        assert!(!instance.is_deleted());
    }

    #[test]
    fn test_find_threads_and_counters_across_model() {
        let mut model = TraceModel::new();
        model.kernel_mut().base_mut().get_or_create_thread(0).set_name("swapper");
        model.get_or_create_process(1).base_mut().get_or_create_thread(1).set_name("swapper");
        model.get_or_create_process(2).base_mut().get_or_create_counter("mem", "rss");
        model.get_or_create_cpu(0).get_or_create_counter("power", "freq");

        assert_eq!(model.find_all_threads_named("swapper").len(), 2);
        assert_eq!(model.get_all_counters().len(), 2);
        assert_eq!(model.get_all_processes().len(), 2);
        assert_eq!(model.get_all_cpus().len(), 1);
    }
}
