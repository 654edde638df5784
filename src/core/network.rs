//! The step driver.
//!
//! A [`Network`] owns every piece of mutable state and runs one simulation step
//! as a fixed sequence of phases:
//!
//! 1. activation
//! 2. temporal buffer push
//! 3. feedback aggregation
//! 4. per-synapse modulation and stability (data-parallel under `parallel`)
//! 5. quiet counters
//! 6. self-organization pass (single writer)
//! 7. invariant check
//!
//! A step either commits whole or is rolled back to the checkpoint taken before
//! phase 1.

use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::NetworkConfig;
use crate::error::{ConfigError, StateError, StoreError, SynmodError};
use crate::feedback::{FeedbackAggregator, NonFiniteFeedback, PerformanceRecord};
use crate::modulation::{ModulationEngine, SynapseUpdate};
use crate::neuron::{initial_role, Activation, Neuron, NeuronId, Role};
use crate::observer::{Diagnostic, DiagnosticSink, Diagnostics, InstabilitySite, TracingSink};
use crate::organization::{PassReport, SelfOrganizationEngine};
use crate::prng::Prng;
use crate::stability::StabilityController;
use crate::state::NetworkState;
use crate::store::{MetricsStore, StateStore};
use crate::synapse::{Synapse, SynapseKey, SynapseTable};
use crate::temporal::{ActivationSnapshot, TemporalBuffer};

/// Execution tier for the per-synapse update phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    /// Single-threaded (default, works everywhere).
    #[default]
    Scalar,
    /// Multi-threaded via rayon (requires `parallel` feature).
    Parallel,
}

/// External drive for one step.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stimulus {
    /// Activations of the input neurons, by position. Missing entries are zero.
    pub inputs: Vec<Activation>,
    /// Neurons held at a fixed activation this step, regardless of role.
    #[cfg_attr(feature = "serde", serde(default))]
    pub clamps: Vec<(NeuronId, Activation)>,
}

impl Stimulus {
    pub fn new(inputs: Vec<Activation>) -> Self {
        Self {
            inputs,
            clamps: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn clamp(mut self, id: NeuronId, value: Activation) -> Self {
        self.clamps.push((id, value));
        self
    }
}

/// Why a step was discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackReason {
    NonFiniteFeedback(f32),
    InvariantViolated(StateError),
}

/// Totals of one self-organization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PassSummary {
    pub pruned: usize,
    pub grown: usize,
    pub reassigned: usize,
    pub conflicts: usize,
}

impl From<&PassReport> for PassSummary {
    fn from(r: &PassReport) -> Self {
        Self {
            pruned: r.pruned.len(),
            grown: r.grown.len(),
            reassigned: r.role_changes.len(),
            conflicts: r.conflicts.len(),
        }
    }
}

/// Outcome of [`Network::step`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// The step this report describes (the committed step on success).
    pub step: u64,
    pub signal: f32,
    pub modulated: usize,
    pub flagged: usize,
    pub instabilities: usize,
    pub pass: Option<PassSummary>,
    pub rolled_back: bool,
    pub rollback_reason: Option<RollbackReason>,
}

#[derive(Clone)]
struct Checkpoint {
    neurons: Vec<Neuron>,
    table: SynapseTable,
    buffer: TemporalBuffer,
    feedback: FeedbackAggregator,
}

pub struct Network {
    cfg: NetworkConfig,
    neurons: Vec<Neuron>,
    table: SynapseTable,
    buffer: TemporalBuffer,
    feedback: FeedbackAggregator,

    modulation: ModulationEngine,
    stability: StabilityController,
    organization: SelfOrganizationEngine,

    sink: Arc<dyn DiagnosticSink>,
    tier: ExecutionTier,

    step: u64,
    last_pass: PassSummary,
    last_report: Option<StepReport>,
}

impl Network {
    /// Build a network with the default `tracing` sink.
    pub fn new(cfg: NetworkConfig) -> Result<Self, ConfigError> {
        Self::with_sink(cfg, Arc::new(TracingSink))
    }

    pub fn with_sink(cfg: NetworkConfig, sink: Arc<dyn DiagnosticSink>) -> Result<Self, ConfigError> {
        let mut net = Self::empty(cfg, sink)?;
        net.wire_initial();
        Ok(net)
    }

    fn empty(cfg: NetworkConfig, sink: Arc<dyn DiagnosticSink>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let n = cfg.neuron_count();
        let neurons = (0..n as NeuronId)
            .map(|id| Neuron::new(id, initial_role(id, cfg.input_size, cfg.hidden_size)))
            .collect();

        Ok(Self {
            neurons,
            table: SynapseTable::new(),
            buffer: TemporalBuffer::new(cfg.temporal_window),
            feedback: FeedbackAggregator::new(&cfg),
            modulation: ModulationEngine::new(&cfg),
            stability: StabilityController::new(&cfg),
            organization: SelfOrganizationEngine::new(&cfg),
            sink,
            tier: ExecutionTier::default(),
            step: 0,
            last_pass: PassSummary::default(),
            last_report: None,
            cfg,
        })
    }

    /// Sparse random feed-forward wiring: each non-output neuron gets up to
    /// `initial_connectivity` outgoing synapses toward neurons of the same or a
    /// later layer, with weights in the lower quarter of the weight band.
    fn wire_initial(&mut self) {
        let k = self.cfg.initial_connectivity;
        if k == 0 {
            return;
        }
        let mut rng = match self.cfg.seed {
            Some(seed) => Prng::new(seed),
            None => Prng::from_clock(),
        };
        let lo = self.cfg.min_synaptic_strength;
        let hi = lo + (self.cfg.max_synaptic_strength - lo) * 0.25;

        for i in 0..self.neurons.len() {
            let src = &self.neurons[i];
            if src.role == Role::Output {
                continue;
            }
            let mut pool: Vec<NeuronId> = self
                .neurons
                .iter()
                .filter(|n| n.id != src.id && n.role != Role::Input && n.role.rank() >= src.role.rank())
                .map(|n| n.id)
                .collect();
            let src_id = src.id;
            for dst in rng.sample(&mut pool, k) {
                let weight = rng.gen_range_f32(lo, hi);
                if let Err(error) = self.table.insert(Synapse::new(src_id, dst, weight, 0.0)) {
                    self.sink.emit(&Diagnostic::StructuralConflict { step: 0, error });
                }
            }
        }
    }

    /// Rebuild a network from a persisted snapshot.
    pub fn from_state(cfg: NetworkConfig, state: &NetworkState) -> Result<Self, SynmodError> {
        Self::from_state_with_sink(cfg, state, Arc::new(TracingSink))
    }

    pub fn from_state_with_sink(
        cfg: NetworkConfig,
        state: &NetworkState,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, SynmodError> {
        let mut net = Self::empty(cfg, sink)?;
        net.restore(state)?;
        Ok(net)
    }

    /// Replace all persisted state with `state`. The network is left untouched
    /// if the snapshot does not fit the config.
    pub fn restore(&mut self, state: &NetworkState) -> Result<(), StateError> {
        state.validate(&self.cfg)?;

        let mut table = SynapseTable::new();
        for s in &state.synapses {
            table.insert(s.clone())?;
        }

        self.neurons = state
            .neurons
            .iter()
            .map(|r| Neuron {
                quiet_steps: r.quiet_steps,
                ..Neuron::new(r.id, r.role)
            })
            .collect();
        self.table = table;
        self.buffer.clear();
        self.feedback = FeedbackAggregator::new(&self.cfg);
        self.feedback.set_signal(state.smoothed_feedback);
        self.step = state.step;
        self.last_pass = PassSummary::default();
        self.last_report = None;
        Ok(())
    }

    /// Canonical snapshot: neurons by id, synapses by `(source, target)`.
    pub fn snapshot(&self) -> NetworkState {
        NetworkState {
            step: self.step,
            smoothed_feedback: self.feedback.signal(),
            neurons: self.neurons.iter().map(Into::into).collect(),
            synapses: self.table.sorted(),
        }
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    pub fn step(&mut self, stimulus: &Stimulus, performance: f32) -> StepReport {
        self.step_with_metrics(stimulus, performance, BTreeMap::new())
    }

    /// Run one step, attaching auxiliary metrics to its performance record.
    pub fn step_with_metrics(
        &mut self,
        stimulus: &Stimulus,
        performance: f32,
        metrics: BTreeMap<String, f32>,
    ) -> StepReport {
        let checkpoint = self.checkpoint();
        let step = self.step + 1;
        let mut report = StepReport {
            step,
            ..StepReport::default()
        };

        // 1. activation
        let activations = self.activate(stimulus, step, &mut report);

        // 2. temporal buffer
        self.buffer
            .push(ActivationSnapshot::from_dense(step, &activations));

        // 3. feedback
        let signal = match self.feedback.observe(step, performance, metrics) {
            Ok(signal) => signal,
            Err(NonFiniteFeedback(value)) => {
                return self.roll_back(checkpoint, report, RollbackReason::NonFiniteFeedback(value));
            }
        };
        report.signal = signal;

        // Structural events are held back until the step commits.
        let mut structural = Vec::new();

        // 4. modulation + stability
        let updates = self.update_synapses(signal);
        let mut flagged = Vec::new();
        for (key, update) in updates {
            if update.modulated {
                report.modulated += 1;
            }
            if let Some(quantity) = update.instability {
                report.instabilities += 1;
                self.sink.emit(&Diagnostic::NumericInstability {
                    step,
                    site: InstabilitySite::Synapse { key, quantity },
                });
            }
            if update.flagged {
                structural.push(Diagnostic::SynapseFlagged { step, key });
                flagged.push(key);
            }
        }
        report.flagged = flagged.len();

        // 5. quiet counters
        self.count_quiet_steps();

        // 6. self-organization
        let window = self.cfg.temporal_window as u64;
        if step % window == 0 || !flagged.is_empty() {
            report.pass = Some(self.reorganize(step, &flagged, &mut structural));
        }

        // 7. invariants
        if let Err(e) = self.check_invariants() {
            return self.roll_back(checkpoint, report, RollbackReason::InvariantViolated(e));
        }

        self.step = step;
        if let Some(pass) = report.pass {
            self.last_pass = pass;
        }
        for event in &structural {
            self.sink.emit(event);
        }
        self.last_report = Some(report.clone());
        report
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            neurons: self.neurons.clone(),
            table: self.table.clone(),
            buffer: self.buffer.clone(),
            feedback: self.feedback.clone(),
        }
    }

    fn roll_back(&mut self, cp: Checkpoint, mut report: StepReport, reason: RollbackReason) -> StepReport {
        self.neurons = cp.neurons;
        self.table = cp.table;
        self.buffer = cp.buffer;
        self.feedback = cp.feedback;

        self.sink.emit(&Diagnostic::StepRolledBack {
            step: report.step,
            reason: reason.clone(),
        });
        report.rolled_back = true;
        report.rollback_reason = Some(reason);
        report.signal = self.feedback.signal();
        report.pass = None;
        self.last_report = Some(report.clone());
        report
    }

    fn activate(&mut self, stimulus: &Stimulus, step: u64, report: &mut StepReport) -> Vec<Activation> {
        let prev: Vec<Activation> = self.neurons.iter().map(|n| n.activation).collect();
        let mut next = vec![0.0; prev.len()];

        for n in &self.neurons {
            let i = n.id as usize;
            if n.role == Role::Input {
                let v = stimulus.inputs.get(i).copied().unwrap_or(0.0);
                next[i] = self.sanitize(v, InstabilitySite::Stimulus { id: n.id }, step, report);
                continue;
            }
            let sum: f32 = self
                .table
                .incoming(n.id)
                .map(|s| s.weight * prev[s.source as usize])
                .sum();
            next[i] = self.sanitize(sum.tanh(), InstabilitySite::Activation { id: n.id }, step, report);
        }

        for &(id, v) in &stimulus.clamps {
            if let Some(slot) = next.get_mut(id as usize) {
                *slot = if v.is_finite() {
                    v
                } else {
                    report.instabilities += 1;
                    self.sink.emit(&Diagnostic::NumericInstability {
                        step,
                        site: InstabilitySite::Stimulus { id },
                    });
                    0.0
                };
            }
        }

        let lr = self.cfg.learning_rate;
        for (n, &a) in self.neurons.iter_mut().zip(&next) {
            n.activation = a;
            n.activity += lr * (a.abs() - n.activity);
        }
        next
    }

    fn sanitize(&self, v: f32, site: InstabilitySite, step: u64, report: &mut StepReport) -> f32 {
        if v.is_finite() {
            return v;
        }
        report.instabilities += 1;
        self.sink.emit(&Diagnostic::NumericInstability { step, site });
        0.0
    }

    fn update_synapses(&mut self, signal: f32) -> Vec<(SynapseKey, SynapseUpdate)> {
        let latest = self.buffer.latest();
        let modulation = &self.modulation;
        let stability = &self.stability;
        let synapses = self.table.as_mut_slice();

        match effective_tier(self.tier) {
            #[cfg(feature = "parallel")]
            ExecutionTier::Parallel => synapses
                .par_iter_mut()
                .map(|s| {
                    let update = modulation.update(s, latest, signal, stability);
                    (s.key(), update)
                })
                .collect(),
            _ => synapses
                .iter_mut()
                .map(|s| {
                    let update = modulation.update(s, latest, signal, stability);
                    (s.key(), update)
                })
                .collect(),
        }
    }

    fn count_quiet_steps(&mut self) {
        let threshold = self.cfg.quiet_weight_threshold;
        for n in &mut self.neurons {
            if n.role != Role::Hidden {
                continue;
            }
            if self.table.net_incident_weight(n.id) < threshold {
                n.quiet_steps = n.quiet_steps.saturating_add(1);
            } else {
                n.quiet_steps = 0;
            }
        }
    }

    fn reorganize(&mut self, step: u64, flagged: &[SynapseKey], events: &mut Vec<Diagnostic>) -> PassSummary {
        let plan = self
            .organization
            .plan(&self.neurons, &self.table, &self.buffer, flagged);
        let report = self
            .organization
            .apply(plan, &mut self.neurons, &mut self.table);

        for s in &report.pruned {
            events.push(Diagnostic::SynapsePruned {
                step,
                key: s.key(),
                age: s.age,
            });
        }
        for g in &report.grown {
            events.push(Diagnostic::SynapseGrown {
                step,
                key: g.key,
                correlation: g.correlation,
            });
        }
        for c in &report.role_changes {
            events.push(Diagnostic::RoleChanged {
                step,
                id: c.id,
                from: c.from,
                to: c.to,
            });
        }
        for &error in &report.conflicts {
            events.push(Diagnostic::StructuralConflict { step, error });
        }

        let summary = PassSummary::from(&report);
        events.push(Diagnostic::PassCompleted {
            step,
            pruned: summary.pruned,
            grown: summary.grown,
            reassigned: summary.reassigned,
        });
        summary
    }

    /// Post-step invariants. Cheap: one sweep over the slab.
    fn check_invariants(&self) -> Result<(), StateError> {
        let n = self.neurons.len();
        for s in self.table.iter() {
            if s.source as usize >= n || s.target as usize >= n {
                return Err(StateError::DanglingSynapse {
                    src: s.source,
                    dst: s.target,
                });
            }
            if !s.weight.is_finite() || !s.trace.is_finite() {
                return Err(StateError::NonFinite {
                    src: s.source,
                    dst: s.target,
                });
            }
            if !self.stability.in_bounds(s.weight) {
                return Err(StateError::WeightOutOfBounds {
                    src: s.source,
                    dst: s.target,
                    weight: s.weight,
                    min: self.stability.min(),
                    max: self.stability.max(),
                });
            }
        }
        if !self.feedback.signal().is_finite() {
            return Err(StateError::NonFiniteFeedback);
        }
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save the current snapshot. Failures are reported, never raised.
    pub fn save_to(&self, store: &dyn StateStore, id: &str) -> Result<(), StoreError> {
        store
            .save(id, &self.snapshot())
            .inspect_err(|e| self.report_storage("save", e))
    }

    /// Load `id` from `store`; `Ok(None)` when nothing has been saved.
    pub fn load_from(
        cfg: NetworkConfig,
        store: &dyn StateStore,
        id: &str,
    ) -> Result<Option<Self>, SynmodError> {
        match store.load(id)? {
            Some(state) => Ok(Some(Self::from_state(cfg, &state)?)),
            None => Ok(None),
        }
    }

    /// Hand every pending performance record to `store`.
    ///
    /// Records that could not be appended stay pending for the next flush.
    pub fn flush_metrics(&mut self, store: &dyn MetricsStore, id: &str) -> Result<usize, StoreError> {
        let pending = self.feedback.drain_unflushed();
        for (i, record) in pending.iter().enumerate() {
            if let Err(e) = store.append(id, record) {
                self.report_storage("append", &e);
                self.feedback.requeue_unflushed(pending[i..].to_vec());
                return Err(e);
            }
        }
        Ok(pending.len())
    }

    /// Take pending records out for an asynchronous flush.
    pub fn drain_metrics(&mut self) -> Vec<PerformanceRecord> {
        self.feedback.drain_unflushed()
    }

    fn report_storage(&self, operation: &'static str, error: &StoreError) {
        self.sink.emit(&Diagnostic::StorageUnavailable {
            operation,
            error: error.clone(),
        });
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &NetworkConfig {
        &self.cfg
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn signal(&self) -> f32 {
        self.feedback.signal()
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn role(&self, id: NeuronId) -> Option<Role> {
        self.neurons.get(id as usize).map(|n| n.role)
    }

    pub fn synapses(&self) -> &SynapseTable {
        &self.table
    }

    pub fn buffer(&self) -> &TemporalBuffer {
        &self.buffer
    }

    pub fn feedback(&self) -> &FeedbackAggregator {
        &self.feedback
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    /// Add or overwrite a synapse by hand. Weights are clipped into bounds.
    pub fn connect(&mut self, source: NeuronId, target: NeuronId, weight: f32) -> Result<(), SynmodError> {
        let n = self.neurons.len();
        if source as usize >= n || target as usize >= n {
            return Err(StateError::DanglingSynapse {
                src: source,
                dst: target,
            }
            .into());
        }
        let weight = self.stability.clip(weight);
        self.table
            .upsert(source, target, weight, 0.0)
            .map(|_| ())
            .inspect_err(|&error| {
                self.sink.emit(&Diagnostic::StructuralConflict {
                    step: self.step,
                    error,
                })
            })
            .map_err(Into::into)
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn execution_tier(&self) -> ExecutionTier {
        self.tier
    }

    /// The tier that will actually run, after compile-time feature gates.
    pub fn effective_execution_tier(&self) -> ExecutionTier {
        effective_tier(self.tier)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let mut d = Diagnostics {
            step: self.step,
            signal: self.feedback.signal(),
            neuron_count: self.neurons.len(),
            synapse_count: self.table.len(),
            pruned_last_pass: self.last_pass.pruned,
            grown_last_pass: self.last_pass.grown,
            reassigned_last_pass: self.last_pass.reassigned,
            mean_performance: self.feedback.mean_raw(),
            dropped_records: self.feedback.dropped_unflushed(),
            ..Diagnostics::default()
        };
        for n in &self.neurons {
            match n.role {
                Role::Input => d.input_count += 1,
                Role::Hidden => d.hidden_count += 1,
                Role::Dynamic => d.dynamic_count += 1,
                Role::Output => d.output_count += 1,
            }
        }
        if !self.table.is_empty() {
            let len = self.table.len() as f32;
            d.mean_weight = self.table.iter().map(|s| s.weight).sum::<f32>() / len;
            d.mean_abs_trace = self.table.iter().map(|s| s.trace.abs()).sum::<f32>() / len;
        }
        if !self.neurons.is_empty() {
            d.mean_activity =
                self.neurons.iter().map(|n| n.activity).sum::<f32>() / self.neurons.len() as f32;
        }
        d
    }
}

fn effective_tier(tier: ExecutionTier) -> ExecutionTier {
    match tier {
        ExecutionTier::Scalar => ExecutionTier::Scalar,
        ExecutionTier::Parallel => {
            #[cfg(feature = "parallel")]
            {
                ExecutionTier::Parallel
            }
            #[cfg(not(feature = "parallel"))]
            {
                ExecutionTier::Scalar
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingSink;
    use crate::store::{InMemoryMetricsStore, InMemoryStateStore};

    fn small(connectivity: usize) -> NetworkConfig {
        NetworkConfig::with_sizes(2, 3, 1)
            .with_initial_connectivity(connectivity)
            .with_seed(11)
    }

    #[test]
    fn construction_rejects_bad_config() {
        let cfg = NetworkConfig::default().with_strength_bounds(2.0, 1.0);
        assert!(Network::new(cfg).is_err());
    }

    #[test]
    fn seeded_wiring_is_reproducible_and_feed_forward() {
        let a = Network::new(small(2)).unwrap();
        let b = Network::new(small(2)).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(!a.synapses().is_empty());

        let hi = 0.1 + (2.0 - 0.1) * 0.25;
        for s in a.synapses().iter() {
            assert_ne!(a.role(s.target), Some(Role::Input));
            assert_ne!(a.role(s.source), Some(Role::Output));
            assert!(s.weight >= 0.1 && s.weight < hi);
        }
    }

    #[test]
    fn inputs_and_clamps_drive_activations() {
        let mut net = Network::new(small(0)).unwrap();
        net.connect(0, 2, 1.0).unwrap();
        let stim = Stimulus::new(vec![1.0, 0.5]).clamp(4, 0.25);
        net.step(&stim, 0.0);
        assert_eq!(net.neurons()[0].activation, 1.0);
        assert_eq!(net.neurons()[1].activation, 0.5);
        assert_eq!(net.neurons()[4].activation, 0.25);
        // Propagation reads the previous step's activations.
        assert_eq!(net.neurons()[2].activation, 0.0);

        net.step(&stim, 0.0);
        let expected = (net.synapses().get(0, 2).unwrap().weight / 0.95).tanh();
        assert!((net.neurons()[2].activation - expected).abs() < 1e-5);
    }

    #[test]
    fn non_finite_performance_rolls_back() {
        let sink = RecordingSink::new();
        let mut net = Network::with_sink(small(2), sink.clone()).unwrap();
        net.step(&Stimulus::new(vec![1.0, 1.0]), 0.5);
        let before = net.snapshot();

        let report = net.step(&Stimulus::new(vec![1.0, 1.0]), f32::NAN);
        assert!(report.rolled_back);
        assert!(matches!(
            report.rollback_reason,
            Some(RollbackReason::NonFiniteFeedback(_))
        ));
        assert_eq!(net.snapshot(), before);
        assert_eq!(net.step_count(), 1);
        assert_eq!(net.buffer().len(), 1);
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::StepRolledBack { .. })),
            1
        );
    }

    #[test]
    fn rolled_back_pass_emits_no_structural_events() {
        let sink = RecordingSink::new();
        let mut net = Network::with_sink(small(2).with_window(1), sink.clone()).unwrap();
        net.step(&Stimulus::new(vec![1.0, 1.0]), 0.5);
        let committed = sink.count(|e| matches!(e, Diagnostic::PassCompleted { .. }));
        assert_eq!(committed, 1);
        let last_pass = net.diagnostics();

        // A synapse into a neuron that does not exist fails the post-step check.
        net.table.upsert(0, 99, 1.0, 0.0).unwrap();
        let report = net.step(&Stimulus::new(vec![1.0, 1.0]), 0.5);
        assert!(report.rolled_back);
        assert!(matches!(
            report.rollback_reason,
            Some(RollbackReason::InvariantViolated(StateError::DanglingSynapse { .. }))
        ));
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::PassCompleted { .. })),
            committed
        );
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::StepRolledBack { .. })),
            1
        );
        let after = net.diagnostics();
        assert_eq!(after.pruned_last_pass, last_pass.pruned_last_pass);
        assert_eq!(after.grown_last_pass, last_pass.grown_last_pass);
        assert_eq!(after.reassigned_last_pass, last_pass.reassigned_last_pass);
    }

    #[test]
    fn diagnostics_report_feedback_history() {
        let cfg = NetworkConfig {
            performance_history_size: 2,
            ..small(1)
        };
        let mut net = Network::new(cfg).unwrap();
        assert_eq!(net.diagnostics().mean_performance, None);
        for perf in [1.0, 2.0, 4.0] {
            net.step(&Stimulus::new(vec![0.5, 0.5]), perf);
        }
        let d = net.diagnostics();
        assert_eq!(d.mean_performance, Some(3.0));
        assert_eq!(d.dropped_records, 1);
    }

    #[test]
    fn non_finite_stimulus_is_substituted() {
        let sink = RecordingSink::new();
        let mut net = Network::with_sink(small(0), sink.clone()).unwrap();
        let report = net.step(&Stimulus::new(vec![f32::NAN, 1.0]).clamp(3, f32::INFINITY), 1.0);
        assert!(!report.rolled_back);
        assert_eq!(report.instabilities, 2);
        assert_eq!(net.neurons()[0].activation, 0.0);
        assert_eq!(net.neurons()[3].activation, 0.0);
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::NumericInstability { .. })),
            2
        );
    }

    #[test]
    fn pass_runs_on_window_boundary() {
        let mut net = Network::new(small(0).with_window(3)).unwrap();
        let reports: Vec<StepReport> = (0..6)
            .map(|_| net.step(&Stimulus::empty(), 0.0))
            .collect();
        let with_pass: Vec<u64> = reports
            .iter()
            .filter(|r| r.pass.is_some())
            .map(|r| r.step)
            .collect();
        assert_eq!(with_pass, vec![3, 6]);
    }

    #[test]
    fn flagged_synapse_triggers_pass_and_is_pruned() {
        let sink = RecordingSink::new();
        let cfg = small(0).with_window(50).with_grace_period(2);
        let mut net = Network::with_sink(cfg, sink.clone()).unwrap();
        net.connect(2, 3, 0.1).unwrap();

        let first = net.step(&Stimulus::empty(), 0.0);
        assert!(first.pass.is_none());
        let second = net.step(&Stimulus::empty(), 0.0);
        assert_eq!(second.flagged, 1);
        assert_eq!(second.pass.map(|p| p.pruned), Some(1));
        assert!(net.synapses().is_empty());
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::SynapsePruned { .. })),
            1
        );
    }

    #[test]
    fn connect_rejects_self_loops_and_dangling_ids() {
        let sink = RecordingSink::new();
        let mut net = Network::with_sink(small(0), sink.clone()).unwrap();
        assert!(net.connect(2, 2, 0.5).is_err());
        assert!(net.connect(2, 99, 0.5).is_err());
        net.connect(2, 3, 50.0).unwrap();
        assert_eq!(net.synapses().get(2, 3).map(|s| s.weight), Some(2.0));
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::StructuralConflict { .. })),
            1
        );
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut net = Network::new(small(2)).unwrap();
        for i in 0..7 {
            net.step(&Stimulus::new(vec![0.3 * i as f32, 0.9]), 0.5);
        }
        let state = net.snapshot();
        let restored = Network::from_state(small(2), &state).unwrap();
        assert_eq!(restored.snapshot(), state);
        assert_eq!(restored.step_count(), 7);
    }

    #[test]
    fn restore_rejects_mismatched_layout() {
        let state = Network::new(small(0)).unwrap().snapshot();
        let mut other = Network::new(NetworkConfig::with_sizes(1, 1, 1)).unwrap();
        assert!(matches!(
            other.restore(&state),
            Err(StateError::NeuronCount { .. })
        ));
    }

    #[test]
    fn storage_failures_are_reported_not_raised() {
        let sink = RecordingSink::new();
        let mut net = Network::with_sink(small(0), sink.clone()).unwrap();
        net.step(&Stimulus::empty(), 1.0);
        net.step(&Stimulus::empty(), 1.0);

        let states = InMemoryStateStore::new();
        states.set_available(false);
        assert!(net.save_to(&states, "n").is_err());

        let metrics = InMemoryMetricsStore::new();
        metrics.set_available(false);
        assert!(net.flush_metrics(&metrics, "n").is_err());
        assert_eq!(net.feedback().pending_len(), 2);

        metrics.set_available(true);
        assert_eq!(net.flush_metrics(&metrics, "n").unwrap(), 2);
        assert_eq!(net.feedback().pending_len(), 0);
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::StorageUnavailable { .. })),
            2
        );

        // The simulation carries on.
        assert!(!net.step(&Stimulus::empty(), 1.0).rolled_back);
    }

    #[test]
    fn load_from_empty_store_is_none() {
        let store = InMemoryStateStore::new();
        assert!(Network::load_from(small(0), &store, "missing").unwrap().is_none());

        let net = Network::new(small(2)).unwrap();
        net.save_to(&store, "n").unwrap();
        let loaded = Network::load_from(small(2), &store, "n").unwrap().unwrap();
        assert_eq!(loaded.snapshot(), net.snapshot());
    }

    #[test]
    fn diagnostics_count_roles() {
        let net = Network::new(small(0)).unwrap();
        let d = net.diagnostics();
        assert_eq!(d.input_count, 2);
        assert_eq!(d.hidden_count, 3);
        assert_eq!(d.output_count, 1);
        assert_eq!(d.synapse_count, 0);
        assert_eq!(d.mean_weight, 0.0);
    }

    #[test]
    fn execution_tier_falls_back_without_feature() {
        let mut net = Network::new(small(0)).unwrap();
        net.set_execution_tier(ExecutionTier::Parallel);
        assert_eq!(net.execution_tier(), ExecutionTier::Parallel);
        #[cfg(not(feature = "parallel"))]
        assert_eq!(net.effective_execution_tier(), ExecutionTier::Scalar);
        #[cfg(feature = "parallel")]
        assert_eq!(net.effective_execution_tier(), ExecutionTier::Parallel);
    }
}
