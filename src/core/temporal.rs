use std::collections::VecDeque;

use crate::neuron::{Activation, NeuronId};

/// Activations of a set of neurons at one step.
///
/// Entries are kept sorted by id. Ids missing from a snapshot mean "no
/// activation"; consumers treat them as zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivationSnapshot {
    pub step: u64,
    entries: Vec<(NeuronId, Activation)>,
}

impl ActivationSnapshot {
    /// Build from `(id, activation)` pairs in any order. Later duplicates win.
    pub fn new(step: u64, mut entries: Vec<(NeuronId, Activation)>) -> Self {
        entries.reverse();
        entries.sort_by_key(|&(id, _)| id);
        entries.dedup_by_key(|&mut (id, _)| id);
        Self { step, entries }
    }

    /// Build from a dense activation vector indexed by neuron id.
    pub fn from_dense(step: u64, activations: &[Activation]) -> Self {
        let entries = activations
            .iter()
            .enumerate()
            .map(|(i, &a)| (i as NeuronId, a))
            .collect();
        Self { step, entries }
    }

    pub fn get(&self, id: NeuronId) -> Option<Activation> {
        self.entries
            .binary_search_by_key(&id, |&(k, _)| k)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Activation of `id`, zero when absent.
    pub fn activation(&self, id: NeuronId) -> Activation {
        self.get(id).unwrap_or(0.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = NeuronId> + '_ {
        self.entries.iter().map(|&(id, _)| id)
    }

    pub fn entries(&self) -> &[(NeuronId, Activation)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed-capacity ring of recent activation snapshots, oldest first.
///
/// The step driver is the only writer; everything else reads through
/// [`TemporalBuffer::window`].
#[derive(Debug, Clone)]
pub struct TemporalBuffer {
    capacity: usize,
    ring: VecDeque<ActivationSnapshot>,
}

impl TemporalBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    pub fn push(&mut self, snapshot: ActivationSnapshot) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot);
    }

    /// Snapshots in insertion order, oldest first.
    pub fn window(&self) -> impl ExactSizeIterator<Item = &ActivationSnapshot> + Clone + '_ {
        self.ring.iter()
    }

    pub fn latest(&self) -> Option<&ActivationSnapshot> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Paired time series of two neurons, restricted to snapshots where both
    /// are present.
    pub fn paired_series(&self, a: NeuronId, b: NeuronId) -> (Vec<Activation>, Vec<Activation>) {
        let mut xs = Vec::with_capacity(self.ring.len());
        let mut ys = Vec::with_capacity(self.ring.len());
        for snap in &self.ring {
            if let (Some(x), Some(y)) = (snap.get(a), snap.get(b)) {
                xs.push(x);
                ys.push(y);
            }
        }
        (xs, ys)
    }
}
