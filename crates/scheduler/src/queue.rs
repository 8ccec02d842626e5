use std::collections::VecDeque;

use tiercomp_core::Priority;

use crate::descriptor::Handle;

/// Pending requests ordered by non-increasing priority, FIFO within a band.
///
/// Insertion scans for the first entry with strictly lower priority, so the
/// queue stays small-and-linear rather than heap shaped; promotion is a
/// remove followed by a fresh insert.
#[derive(Debug, Default)]
pub struct CompileQueue {
    entries: Vec<(Handle, Priority)>,
}

impl CompileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert behind every entry of equal or higher priority.
    pub fn insert(&mut self, handle: Handle, priority: Priority) {
        let at = self
            .entries
            .iter()
            .position(|(_, p)| *p < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (handle, priority));
    }

    pub fn remove(&mut self, handle: Handle) -> bool {
        match self.entries.iter().position(|(h, _)| *h == handle) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, at: usize) -> Option<Handle> {
        (at < self.entries.len()).then(|| self.entries.remove(at).0)
    }

    /// Move `handle` to the slot its new priority calls for.
    pub fn promote(&mut self, handle: Handle, priority: Priority) -> bool {
        if !self.remove(handle) {
            return false;
        }
        self.insert(handle, priority);
        true
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.iter().any(|(h, _)| *h == handle)
    }

    pub fn head(&self) -> Option<(Handle, Priority)> {
        self.entries.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, Priority)> + '_ {
        self.entries.iter().copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.iter().map(|(h, _)| *h)
    }

    pub fn drain(&mut self) -> Vec<Handle> {
        self.entries.drain(..).map(|(h, _)| h).collect()
    }

    /// Whether the recorded priorities are non-increasing front to back.
    pub fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].1 >= w[1].1)
    }
}

/// FIFO of low-priority follow-up work (upgrades).
#[derive(Debug, Default)]
pub struct LowPriorityQueue {
    entries: VecDeque<Handle>,
}

impl LowPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, handle: Handle) {
        self.entries.push_back(handle);
    }

    pub fn pop(&mut self) -> Option<Handle> {
        self.entries.pop_front()
    }

    pub fn remove(&mut self, handle: Handle) -> bool {
        match self.entries.iter().position(|h| *h == handle) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.iter().copied()
    }

    pub fn drain(&mut self) -> Vec<Handle> {
        self.entries.drain(..).collect()
    }
}
