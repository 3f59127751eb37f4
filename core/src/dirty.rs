//! Per-category dirty flags.
//!
//! RULE: A flag is set by any mutator and cleared only when a save that
//! started after the mark completes successfully. Every mark carries a
//! sequence number; a save records the sequence it began at and, on
//! success, clears exactly the flags marked at or before that point.
//! Marks that land while the save is in flight survive it.

use crate::types::StateCategory;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct DirtyTracker {
    /// category -> sequence number of its most recent mark
    marks: BTreeMap<StateCategory, u64>,
    seq:   u64,
}

impl DirtyTracker {
    pub fn new() -> Self { Self::default() }

    /// Set the flag for `category`. Returns the new sequence number.
    pub fn mark(&mut self, category: StateCategory) -> u64 {
        self.seq += 1;
        self.marks.insert(category, self.seq);
        self.seq
    }

    pub fn is_dirty(&self, category: StateCategory) -> bool {
        self.marks.contains_key(&category)
    }

    pub fn has_dirty_flags(&self) -> bool {
        !self.marks.is_empty()
    }

    pub fn dirty_categories(&self) -> Vec<StateCategory> {
        self.marks.keys().copied().collect()
    }

    /// The sequence a save captures when it snapshots providers.
    pub fn checkpoint(&self) -> u64 {
        self.seq
    }

    /// Clear every flag marked at or before `checkpoint`, in one step.
    pub fn commit(&mut self, checkpoint: u64) {
        self.marks.retain(|_, marked_at| *marked_at > checkpoint);
    }

    pub fn clear_all(&mut self) {
        self.marks.clear();
    }
}
