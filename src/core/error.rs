//! Error types for every collaborator boundary.
//!
//! Only [`ConfigError`] is fatal, and only at construction. Numeric faults inside
//! a step are substituted locally or cause a rollback; storage faults are
//! reported to the caller of the persistence operation.

use crate::neuron::NeuronId;

/// Invalid construction-time parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("network must contain at least one neuron")]
    EmptyNetwork,

    #[error("too many neurons: {0}")]
    TooManyNeurons(usize),

    #[error("temporal_window must be positive")]
    ZeroWindow,

    #[error("performance_history_size must be positive")]
    ZeroHistory,

    #[error("grace period must be positive")]
    ZeroGracePeriod,

    #[error("{0} must be finite")]
    NonFinite(&'static str),

    #[error("{field} must be non-negative (got {value})")]
    Negative { field: &'static str, value: f32 },

    #[error("{field} must be in (0, 1] (got {value})")]
    OutOfUnitRange { field: &'static str, value: f32 },

    #[error("min_synaptic_strength ({min}) exceeds max_synaptic_strength ({max})")]
    InvertedBounds { min: f32, max: f32 },
}

/// Rejected topology mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SynapseError {
    #[error("self-loop rejected on neuron {0}")]
    SelfLoop(NeuronId),

    #[error("duplicate synapse {src} -> {dst}")]
    Duplicate { src: NeuronId, dst: NeuronId },
}

/// External store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
}

/// A snapshot that cannot be installed into a network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("neuron table has {found} entries, config expects {expected}")]
    NeuronCount { expected: usize, found: usize },

    #[error("neuron {id} out of order or out of range")]
    NeuronId { id: NeuronId },

    #[error("neuron {id} has role {found:?}, layout expects {expected}")]
    Role {
        id: NeuronId,
        expected: &'static str,
        found: crate::neuron::Role,
    },

    #[error("synapse {src} -> {dst} references a missing neuron")]
    DanglingSynapse { src: NeuronId, dst: NeuronId },

    #[error("synapse {src} -> {dst} weight {weight} outside [{min}, {max}]")]
    WeightOutOfBounds {
        src: NeuronId,
        dst: NeuronId,
        weight: f32,
        min: f32,
        max: f32,
    },

    #[error("synapse {src} -> {dst} carries a non-finite value")]
    NonFinite { src: NeuronId, dst: NeuronId },

    #[error(transparent)]
    Topology(#[from] SynapseError),

    #[error("smoothed feedback must be finite")]
    NonFiniteFeedback,
}

/// Umbrella error for callers that do not care which boundary failed.
#[derive(Debug, thiserror::Error)]
pub enum SynmodError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Synapse(#[from] SynapseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("state image: {0}")]
    Image(#[from] std::io::Error),
}

pub type Result<T, E = SynmodError> = core::result::Result<T, E>;
