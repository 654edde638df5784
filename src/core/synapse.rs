//! Sparse synapse storage.
//!
//! Synapses live in a dense slab (`Vec<Synapse>`) so the per-step weight phase
//! can sweep them linearly (and in parallel). A hash index maps each
//! `(source, target)` key to its slab slot, and per-neuron incidence lists give
//! O(degree) neighbor queries. Removal swaps the last slot into the hole and
//! patches the index, so slab order stays a pure function of the operation
//! history.

use hashbrown::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::SynapseError;
use crate::neuron::NeuronId;

/// Type alias for synaptic weights.
pub type Weight = f32;

/// Ordered `(source, target)` pair; the unique key of a synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseKey {
    pub source: NeuronId,
    pub target: NeuronId,
}

impl SynapseKey {
    pub fn new(source: NeuronId, target: NeuronId) -> Self {
        Self { source, target }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Synapse {
    pub source: NeuronId,
    pub target: NeuronId,
    pub weight: Weight,
    /// Eligibility trace: decaying memory of recent co-activation.
    pub trace: f32,
    /// Steps since creation.
    pub age: u64,
    /// Consecutive steps spent at the weight floor with a sub-threshold trace.
    #[cfg_attr(feature = "serde", serde(default))]
    pub floor_steps: u32,
}

impl Synapse {
    pub fn new(source: NeuronId, target: NeuronId, weight: Weight, trace: f32) -> Self {
        Self {
            source,
            target,
            weight,
            trace,
            age: 0,
            floor_steps: 0,
        }
    }

    pub fn key(&self) -> SynapseKey {
        SynapseKey::new(self.source, self.target)
    }
}

/// Result of [`SynapseTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct SynapseTable {
    slab: Vec<Synapse>,
    index: HashMap<SynapseKey, usize>,
    incidence: HashMap<NeuronId, Vec<SynapseKey>>,
}

impl SynapseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    pub fn get(&self, source: NeuronId, target: NeuronId) -> Option<&Synapse> {
        self.index
            .get(&SynapseKey::new(source, target))
            .map(|&slot| &self.slab[slot])
    }

    pub fn get_mut(&mut self, source: NeuronId, target: NeuronId) -> Option<&mut Synapse> {
        match self.index.get(&SynapseKey::new(source, target)) {
            Some(&slot) => Some(&mut self.slab[slot]),
            None => None,
        }
    }

    pub fn contains(&self, source: NeuronId, target: NeuronId) -> bool {
        self.index.contains_key(&SynapseKey::new(source, target))
    }

    /// Whether `a` and `b` are connected in either direction.
    pub fn connected(&self, a: NeuronId, b: NeuronId) -> bool {
        self.contains(a, b) || self.contains(b, a)
    }

    /// Create or overwrite a synapse's weight and trace. Self-loops are rejected.
    ///
    /// Overwriting keeps the synapse's age.
    pub fn upsert(
        &mut self,
        source: NeuronId,
        target: NeuronId,
        weight: Weight,
        trace: f32,
    ) -> Result<Upsert, SynapseError> {
        if source == target {
            return Err(SynapseError::SelfLoop(source));
        }
        if let Some(s) = self.get_mut(source, target) {
            s.weight = weight;
            s.trace = trace;
            return Ok(Upsert::Updated);
        }
        self.push_new(Synapse::new(source, target, weight, trace));
        Ok(Upsert::Created)
    }

    /// Insert a fully-specified synapse. Duplicates and self-loops are rejected.
    pub fn insert(&mut self, synapse: Synapse) -> Result<(), SynapseError> {
        if synapse.source == synapse.target {
            return Err(SynapseError::SelfLoop(synapse.source));
        }
        if self.contains(synapse.source, synapse.target) {
            return Err(SynapseError::Duplicate {
                src: synapse.source,
                dst: synapse.target,
            });
        }
        self.push_new(synapse);
        Ok(())
    }

    fn push_new(&mut self, synapse: Synapse) {
        let key = synapse.key();
        self.index.insert(key, self.slab.len());
        self.incidence.entry(key.source).or_default().push(key);
        self.incidence.entry(key.target).or_default().push(key);
        self.slab.push(synapse);
    }

    pub fn remove(&mut self, source: NeuronId, target: NeuronId) -> Option<Synapse> {
        let key = SynapseKey::new(source, target);
        let slot = self.index.remove(&key)?;

        self.detach(key.source, key);
        self.detach(key.target, key);

        let removed = self.slab.swap_remove(slot);
        if let Some(moved) = self.slab.get(slot) {
            self.index.insert(moved.key(), slot);
        }
        Some(removed)
    }

    fn detach(&mut self, id: NeuronId, key: SynapseKey) {
        if let Some(list) = self.incidence.get_mut(&id) {
            if let Some(pos) = list.iter().position(|k| *k == key) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.incidence.remove(&id);
            }
        }
    }

    /// Incident synapses of `id`, incoming and outgoing.
    ///
    /// The returned iterator is lazy and `Clone`, so it can be restarted.
    pub fn synapses_of(&self, id: NeuronId) -> IncidentSynapses<'_> {
        let keys = self
            .incidence
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        IncidentSynapses {
            table: self,
            keys: keys.iter(),
        }
    }

    /// Callback flavour of [`SynapseTable::synapses_of`].
    pub fn for_each_synapse_of<F: FnMut(&Synapse)>(&self, id: NeuronId, mut f: F) {
        for s in self.synapses_of(id) {
            f(s);
        }
    }

    pub fn degree(&self, id: NeuronId) -> usize {
        self.incidence.get(&id).map_or(0, |v| v.len())
    }

    /// Sum of absolute weights of every synapse touching `id`.
    pub fn net_incident_weight(&self, id: NeuronId) -> f32 {
        self.synapses_of(id).map(|s| s.weight.abs()).sum()
    }

    /// Incoming synapses of `id` (those where `id` is the target).
    pub fn incoming(&self, id: NeuronId) -> impl Iterator<Item = &Synapse> + '_ {
        self.synapses_of(id).filter(move |s| s.target == id)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Synapse> {
        self.slab.iter()
    }

    /// Mutable view of every synapse. Structure cannot change through it.
    pub fn as_mut_slice(&mut self) -> &mut [Synapse] {
        &mut self.slab
    }

    pub fn as_slice(&self) -> &[Synapse] {
        &self.slab
    }

    /// All synapses sorted by key; the canonical persisted order.
    pub fn sorted(&self) -> Vec<Synapse> {
        let mut out = self.slab.clone();
        out.sort_by_key(|s| s.key());
        out
    }

    pub fn clear(&mut self) {
        self.slab.clear();
        self.index.clear();
        self.incidence.clear();
    }
}

/// Lazy, restartable iterator over the synapses incident to one neuron.
#[derive(Clone)]
pub struct IncidentSynapses<'a> {
    table: &'a SynapseTable,
    keys: core::slice::Iter<'a, SynapseKey>,
}

impl<'a> Iterator for IncidentSynapses<'a> {
    type Item = &'a Synapse;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        let slot = self.table.index.get(key)?;
        Some(&self.table.slab[*slot])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_then_overwrites() {
        let mut t = SynapseTable::new();
        assert_eq!(t.upsert(0, 1, 0.5, 0.0), Ok(Upsert::Created));
        t.get_mut(0, 1).unwrap().age = 7;
        assert_eq!(t.upsert(0, 1, 0.75, 0.2), Ok(Upsert::Updated));
        let s = t.get(0, 1).unwrap();
        assert_eq!(s.weight, 0.75);
        assert_eq!(s.trace, 0.2);
        assert_eq!(s.age, 7);
        assert_eq!(t.len(), 1);
        assert!(t.get(1, 0).is_none());
    }

    #[test]
    fn self_loops_rejected() {
        let mut t = SynapseTable::new();
        assert_eq!(t.upsert(3, 3, 0.5, 0.0), Err(SynapseError::SelfLoop(3)));
        assert_eq!(
            t.insert(Synapse::new(2, 2, 0.5, 0.0)),
            Err(SynapseError::SelfLoop(2))
        );
        assert!(t.is_empty());
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut t = SynapseTable::new();
        t.insert(Synapse::new(0, 1, 0.5, 0.0)).unwrap();
        assert_eq!(
            t.insert(Synapse::new(0, 1, 0.9, 0.0)),
            Err(SynapseError::Duplicate { src: 0, dst: 1 })
        );
        // Reverse direction is a distinct synapse.
        t.insert(Synapse::new(1, 0, 0.5, 0.0)).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut t = SynapseTable::new();
        t.upsert(0, 1, 0.1, 0.0).unwrap();
        t.upsert(1, 2, 0.2, 0.0).unwrap();
        t.upsert(2, 0, 0.3, 0.0).unwrap();

        let removed = t.remove(0, 1).unwrap();
        assert_eq!(removed.weight, 0.1);
        assert!(t.remove(0, 1).is_none());

        // The moved synapse must still resolve.
        assert_eq!(t.get(2, 0).unwrap().weight, 0.3);
        assert_eq!(t.get(1, 2).unwrap().weight, 0.2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.degree(0), 1);
        assert_eq!(t.degree(1), 1);
        assert_eq!(t.degree(2), 2);
    }

    #[test]
    fn incident_iteration_covers_both_directions() {
        let mut t = SynapseTable::new();
        t.upsert(0, 1, 0.5, 0.0).unwrap();
        t.upsert(2, 1, 0.25, 0.0).unwrap();
        t.upsert(1, 3, 1.0, 0.0).unwrap();
        t.upsert(0, 3, 1.0, 0.0).unwrap();

        let mut keys: Vec<SynapseKey> = t.synapses_of(1).map(|s| s.key()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SynapseKey::new(0, 1),
                SynapseKey::new(1, 3),
                SynapseKey::new(2, 1)
            ]
        );

        // Restartable.
        let it = t.synapses_of(1);
        assert_eq!(it.clone().count(), 3);
        assert_eq!(it.count(), 3);

        assert!((t.net_incident_weight(1) - 1.75).abs() < 1e-6);
        assert_eq!(t.incoming(1).count(), 2);
        assert_eq!(t.synapses_of(42).count(), 0);

        let mut seen = 0;
        t.for_each_synapse_of(3, |_| seen += 1);
        assert_eq!(seen, 2);
    }

    #[test]
    fn connected_checks_either_direction() {
        let mut t = SynapseTable::new();
        t.upsert(4, 5, 0.5, 0.0).unwrap();
        assert!(t.connected(4, 5));
        assert!(t.connected(5, 4));
        assert!(!t.connected(4, 6));
    }

    #[test]
    fn sorted_is_canonical() {
        let mut t = SynapseTable::new();
        t.upsert(3, 1, 0.5, 0.0).unwrap();
        t.upsert(0, 2, 0.5, 0.0).unwrap();
        t.upsert(0, 1, 0.5, 0.0).unwrap();
        let keys: Vec<_> = t.sorted().iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                SynapseKey::new(0, 1),
                SynapseKey::new(0, 2),
                SynapseKey::new(3, 1)
            ]
        );
    }
}
