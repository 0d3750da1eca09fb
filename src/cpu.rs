//! Cpus: scheduling slices and per-cpu counters

use crate::counter::{counter_key, Counter};
use crate::range::Range;
use crate::slice::SliceGroup;
use std::collections::{BTreeMap, BTreeSet};

/// One processor of the traced machine
#[derive(Debug, Clone, PartialEq)]
pub struct Cpu {
    cpu_number: u32,
    slices: SliceGroup,
    counters: BTreeMap<String, Counter>,
    bounds: Range,
}

impl Cpu {
    pub fn new(cpu_number: u32) -> Self {
        Cpu {
            cpu_number,
            slices: SliceGroup::new(),
            counters: BTreeMap::new(),
            bounds: Range::new(),
        }
    }

    pub fn cpu_number(&self) -> u32 {
        self.cpu_number
    }

    pub fn slices(&self) -> &SliceGroup {
        &self.slices
    }

    pub fn slices_mut(&mut self) -> &mut SliceGroup {
        &mut self.slices
    }

    pub fn counters(&self) -> impl Iterator<Item = &Counter> {
        self.counters.values()
    }

    pub fn get_or_create_counter(&mut self, category: &str, name: &str) -> &mut Counter {
        self.counters
            .entry(counter_key(category, name))
            .or_insert_with(|| Counter::new(category, name))
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        self.slices.update_bounds();
        self.bounds.add_range(self.slices.bounds());
        for counter in self.counters.values_mut() {
            counter.update_bounds();
            self.bounds.add_range(counter.bounds());
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        self.slices.shift_timestamps_forward(amount);
        for counter in self.counters.values_mut() {
            counter.shift_timestamps_forward(amount);
        }
    }

    pub fn add_categories_to(&self, categories: &mut BTreeSet<String>) {
        self.slices.add_categories_to(categories);
        for counter in self.counters.values() {
            if !categories.contains(counter.category()) {
                categories.insert(counter.category().to_string());
            }
        }
    }
}
