//! Threads: one slice timeline each

use crate::range::Range;
use crate::slice::SliceGroup;
use std::collections::BTreeSet;

/// A thread of a process (or of the kernel)
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    tid: i64,
    name: Option<String>,
    sort_index: i64,
    slice_group: SliceGroup,
    bounds: Range,
}

impl Thread {
    pub fn new(tid: i64) -> Self {
        Thread {
            tid,
            name: None,
            sort_index: 0,
            slice_group: SliceGroup::new(),
            bounds: Range::new(),
        }
    }

    pub fn tid(&self) -> i64 {
        self.tid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Name when known, `"tid"` otherwise
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{}: {}", name, self.tid),
            None => self.tid.to_string(),
        }
    }

    pub fn sort_index(&self) -> i64 {
        self.sort_index
    }

    pub fn set_sort_index(&mut self, sort_index: i64) {
        self.sort_index = sort_index;
    }

    pub fn slice_group(&self) -> &SliceGroup {
        &self.slice_group
    }

    pub fn slice_group_mut(&mut self) -> &mut SliceGroup {
        &mut self.slice_group
    }

    /// No closed and no open slices
    pub fn is_empty(&self) -> bool {
        self.slice_group.is_empty()
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        self.slice_group.update_bounds();
        self.bounds.add_range(self.slice_group.bounds());
    }

    pub fn shift_timestamps_forward(&mut self, amount: i64) {
        self.slice_group.shift_timestamps_forward(amount);
    }

    pub fn add_categories_to(&self, categories: &mut BTreeSet<String>) {
        self.slice_group.add_categories_to(categories);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Slice;
    use crate::timestamp::Timestamp;
    use serde_json::json;

    #[test]
    fn test_thread_bounds_follow_slices() {
        let mut thread = Thread::new(7);
        assert!(thread.is_empty());
        thread
            .slice_group_mut()
            .push_slice(Slice::new("cat", "a", Timestamp::from_nanos(10), 5, json!({})))
            .unwrap();
        thread.update_bounds();
        assert!(!thread.is_empty());
        assert_eq!(thread.bounds().min(), Some(Timestamp::from_nanos(10)));
        assert_eq!(thread.bounds().max(), Some(Timestamp::from_nanos(15)));
    }

    #[test]
    fn test_open_slice_keeps_thread_alive() {
        let mut thread = Thread::new(1);
        thread
            .slice_group_mut()
            .begin_slice("cat", "open", Timestamp::from_nanos(3), json!({}));
        assert!(!thread.is_empty());
    }

    #[test]
    fn test_display_name() {
        let mut thread = Thread::new(42);
        assert_eq!(thread.display_name(), "42");
        thread.set_name("CrRendererMain");
        assert_eq!(thread.display_name(), "CrRendererMain: 42");
    }
}
