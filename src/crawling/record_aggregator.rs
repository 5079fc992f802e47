//! Phase-1 aggregation
//!
//! Folds every facet pass into one record per (month, id), keeping the
//! highest-priority status, and tracks which records still await delivery.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::{AggregatedRecord, HarvestedRecord, PhaseOneStatus, RecordKey, WireRow, resolve_phase_one};

/// Effect of one sighting on the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    New,
    Upgraded,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct RecordAggregator {
    records: Vec<AggregatedRecord>,
    index: HashMap<RecordKey, usize>,
    pending: VecDeque<usize>,
    queued: HashSet<usize>,
    delivered: HashSet<usize>,
    requeued: HashSet<usize>,
}

impl RecordAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, record: HarvestedRecord, status: PhaseOneStatus) -> Sighting {
        let key = record.key();
        let Some(&pos) = self.index.get(&key) else {
            let pos = self.records.len();
            self.records.push(AggregatedRecord::first_sighting(record, status));
            self.index.insert(key, pos);
            self.enqueue(pos);
            return Sighting::New;
        };

        let current = self.records[pos].phase_one;
        let resolved = resolve_phase_one(Some(current), status);
        if resolved == current {
            return Sighting::Unchanged;
        }

        self.records[pos].phase_one = resolved;
        // Already delivered with a lower status: send it once more.
        if self.delivered.contains(&pos) && !self.queued.contains(&pos) && self.requeued.insert(pos) {
            self.enqueue(pos);
        }
        Sighting::Upgraded
    }

    /// Absorbs a whole pass; returns how many records were new.
    pub fn absorb_pass(&mut self, records: Vec<HarvestedRecord>, status: PhaseOneStatus) -> usize {
        records
            .into_iter()
            .map(|r| self.absorb(r, status))
            .filter(|s| *s == Sighting::New)
            .count()
    }

    fn enqueue(&mut self, pos: usize) {
        if self.queued.insert(pos) {
            self.pending.push_back(pos);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes up to `max` pending records in queue order and returns their
    /// wire rows with their current status.
    pub fn take_batch(&mut self, max: usize) -> Vec<WireRow> {
        let take = max.min(self.pending.len());
        self.pending
            .drain(..take)
            .collect::<Vec<_>>()
            .into_iter()
            .map(|pos| {
                self.queued.remove(&pos);
                self.delivered.insert(pos);
                self.records[pos].to_wire()
            })
            .collect()
    }

    /// All records in first-sighting order.
    pub fn records(&self) -> &[AggregatedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
