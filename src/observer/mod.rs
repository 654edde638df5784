use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StoreError, SynapseError};
use crate::modulation::Quantity;
use crate::network::{Network, RollbackReason, StepReport};
use crate::neuron::{NeuronId, Role};
use crate::synapse::SynapseKey;

/// Something noteworthy the engine did or survived.
///
/// Nothing here is fatal: events are reported, the simulation carries on.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A non-finite value was replaced by a safe substitute.
    NumericInstability {
        step: u64,
        site: InstabilitySite,
    },
    /// A duplicate or self-loop synapse was rejected.
    StructuralConflict { step: u64, error: SynapseError },
    SynapseFlagged { step: u64, key: SynapseKey },
    SynapsePruned {
        step: u64,
        key: SynapseKey,
        age: u64,
    },
    SynapseGrown {
        step: u64,
        key: SynapseKey,
        correlation: f32,
    },
    RoleChanged {
        step: u64,
        id: NeuronId,
        from: Role,
        to: Role,
    },
    StepRolledBack { step: u64, reason: RollbackReason },
    StorageUnavailable {
        operation: &'static str,
        error: StoreError,
    },
    PassCompleted {
        step: u64,
        pruned: usize,
        grown: usize,
        reassigned: usize,
    },
}

/// Where a non-finite value showed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstabilitySite {
    Synapse { key: SynapseKey, quantity: Quantity },
    /// Non-finite stimulus or clamp value for a neuron.
    Stimulus { id: NeuronId },
    /// Non-finite weighted input sum.
    Activation { id: NeuronId },
}

impl Diagnostic {
    /// Warning-level events; the rest is structural churn.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Diagnostic::NumericInstability { .. }
                | Diagnostic::StructuralConflict { .. }
                | Diagnostic::StepRolledBack { .. }
                | Diagnostic::StorageUnavailable { .. }
        )
    }
}

/// Receiver for [`Diagnostic`] events, injected into a [`Network`].
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: &Diagnostic);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: &Diagnostic) {
        match event {
            Diagnostic::NumericInstability { step, site } => {
                tracing::warn!(step, ?site, "non-finite value substituted")
            }
            Diagnostic::StructuralConflict { step, error } => {
                tracing::warn!(step, %error, "structural conflict rejected")
            }
            Diagnostic::StepRolledBack { step, reason } => {
                tracing::warn!(step, ?reason, "step rolled back")
            }
            Diagnostic::StorageUnavailable { operation, error } => {
                tracing::warn!(operation, %error, "storage unavailable")
            }
            Diagnostic::SynapseFlagged { step, key } => {
                tracing::trace!(step, src = key.source, dst = key.target, "synapse flagged")
            }
            Diagnostic::SynapsePruned { step, key, age } => {
                tracing::debug!(step, src = key.source, dst = key.target, age, "synapse pruned")
            }
            Diagnostic::SynapseGrown {
                step,
                key,
                correlation,
            } => tracing::debug!(
                step,
                src = key.source,
                dst = key.target,
                correlation,
                "synapse grown"
            ),
            Diagnostic::RoleChanged { step, id, from, to } => {
                tracing::debug!(step, id, %from, %to, "role changed")
            }
            Diagnostic::PassCompleted {
                step,
                pruned,
                grown,
                reassigned,
            } => tracing::debug!(step, pruned, grown, reassigned, "self-organization pass"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _event: &Diagnostic) {}
}

/// Keeps every event in memory. Mostly for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count<F: Fn(&Diagnostic) -> bool>(&self, pred: F) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, event: &Diagnostic) {
        self.events.lock().push(event.clone());
    }
}

/// Aggregate counters over the current network.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostics {
    pub step: u64,
    pub signal: f32,
    pub neuron_count: usize,
    pub input_count: usize,
    pub hidden_count: usize,
    pub dynamic_count: usize,
    pub output_count: usize,
    pub synapse_count: usize,
    pub mean_weight: f32,
    pub mean_abs_trace: f32,
    pub mean_activity: f32,
    pub pruned_last_pass: usize,
    pub grown_last_pass: usize,
    pub reassigned_last_pass: usize,
    /// Mean raw performance over the in-memory history.
    pub mean_performance: Option<f32>,
    /// Performance records evicted before they could be flushed.
    pub dropped_records: u64,
}

/// A read-only snapshot of what the network is doing.
///
/// Observers cannot mutate or steer the network; snapshotting allocates, the
/// step loop does not.
#[derive(Debug, Clone)]
pub struct NetworkSnapshotView {
    pub diagnostics: Diagnostics,
    pub activations: Vec<f32>,
    pub roles: Vec<Role>,
    pub last_report: Option<StepReport>,
    /// Strongest synapses first, capped at `top_k`.
    pub strongest: Vec<(SynapseKey, f32)>,
}

pub struct NetworkAdapter<'a> {
    network: &'a Network,
    top_k: usize,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(network: &'a Network) -> Self {
        Self { network, top_k: 10 }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn snapshot(&self) -> NetworkSnapshotView {
        let mut strongest: Vec<(SynapseKey, f32)> = self
            .network
            .synapses()
            .iter()
            .map(|s| (s.key(), s.weight))
            .collect();
        strongest.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        strongest.truncate(self.top_k);

        NetworkSnapshotView {
            diagnostics: self.network.diagnostics(),
            activations: self.network.neurons().iter().map(|n| n.activation).collect(),
            roles: self.network.neurons().iter().map(|n| n.role).collect(),
            last_report: self.network.last_report().cloned(),
            strongest,
        }
    }
}
