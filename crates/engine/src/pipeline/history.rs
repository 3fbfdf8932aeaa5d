//! Fixed-capacity execution history indexed by sequence id.

use relay_types::{ExecutionResult, HistoryEntry};

/// Circular log of past executions.
///
/// An entry with sequence id `n` lives in slot `n % capacity`; a later entry
/// landing on the same slot overwrites it. Sequence ids advance on every
/// pipeline completion, so slots may be skipped when a completion did not
/// record an entry.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Vec<Option<HistoryEntry>>,
}

impl HistoryRing {
    /// Create a ring with `capacity` slots. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
        }
    }

    /// Store `result` under `sequence_id`, returning the entry it overwrote.
    pub fn push(&mut self, sequence_id: u64, result: ExecutionResult) -> Option<HistoryEntry> {
        let slot = self.slot_for(sequence_id);
        self.slots[slot].replace(HistoryEntry { sequence_id, result })
    }

    /// Entry stored in `slot`, if any.
    pub fn get(&self, slot: usize) -> Option<&HistoryEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Most recent entry by sequence id.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.slots.iter().flatten().max_by_key(|entry| entry.sequence_id)
    }

    /// All stored entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.slots.iter().flatten().cloned().collect();
        entries.sort_by_key(|entry| entry.sequence_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn slot_for(&self, sequence_id: u64) -> usize {
        (sequence_id % self.slots.len() as u64) as usize
    }
}
