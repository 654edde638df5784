//! Adaptive synaptic modulation.
//!
//! A sparse network of neurons whose synapse weights follow a reward-modulated
//! three-factor rule, bounded by homeostatic decay and clipping, and whose
//! topology is reshaped by correlation-driven growth, pruning and role
//! reassignment. See [`network::Network`] for the step driver.

#[path = "core/config.rs"]
pub mod config;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/neuron.rs"]
pub mod neuron;

#[path = "core/temporal.rs"]
pub mod temporal;

#[path = "core/synapse.rs"]
pub mod synapse;

#[path = "core/stability.rs"]
pub mod stability;

#[path = "core/modulation.rs"]
pub mod modulation;

#[path = "core/organization.rs"]
pub mod organization;

#[path = "core/feedback.rs"]
pub mod feedback;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/state.rs"]
pub mod state;

#[path = "core/store.rs"]
pub mod store;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/network.rs"]
pub mod network;

pub mod observer;

pub mod prelude {
    pub use crate::config::NetworkConfig;
    pub use crate::error::{ConfigError, StateError, StoreError, SynapseError, SynmodError};
    pub use crate::feedback::PerformanceRecord;
    pub use crate::network::{ExecutionTier, Network, RollbackReason, StepReport, Stimulus};
    pub use crate::neuron::{NeuronId, Role};
    pub use crate::observer::{
        Diagnostic, DiagnosticSink, Diagnostics, NetworkAdapter, NullSink, RecordingSink,
        TracingSink,
    };
    pub use crate::state::NetworkState;
    pub use crate::store::{InMemoryMetricsStore, InMemoryStateStore, MetricsStore, StateStore};
    pub use crate::synapse::{Synapse, SynapseKey};
}
