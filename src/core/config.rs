#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Construction-time parameters shared by every component of a [`Network`].
///
/// Built once, validated once, then handed by reference to each rule engine.
///
/// [`Network`]: crate::network::Network
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,

    // EMA rate of each neuron's running activity level (diagnostics only).
    pub learning_rate: f32,
    pub modulation_rate: f32,

    // Snapshots kept in the temporal buffer; also the self-organization period.
    pub temporal_window: usize,
    pub plasticity_threshold: f32,

    // Homeostatic decay per step; the feedback EMA uses 1 - decay_rate.
    pub decay_rate: f32,
    pub max_synaptic_strength: f32,
    pub min_synaptic_strength: f32,

    pub performance_history_size: usize,

    pub trace_decay: f32,

    // Defaults to temporal_window when unset.
    pub grace_period: Option<u32>,

    pub quiet_weight_threshold: f32,
    pub reactivation_degree: usize,

    // Random outgoing synapses per non-output neuron at construction.
    pub initial_connectivity: usize,

    // If set, makes initial wiring reproducible.
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 10,
            hidden_size: 20,
            output_size: 5,
            learning_rate: 0.01,
            modulation_rate: 0.1,
            temporal_window: 5,
            plasticity_threshold: 0.3,
            decay_rate: 0.95,
            max_synaptic_strength: 2.0,
            min_synaptic_strength: 0.1,
            performance_history_size: 100,
            trace_decay: 0.9,
            grace_period: None,
            quiet_weight_threshold: 0.2,
            reactivation_degree: 2,
            initial_connectivity: 2,
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Default configuration with explicit layer sizes.
    pub fn with_sizes(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_window(mut self, temporal_window: usize) -> Self {
        self.temporal_window = temporal_window;
        self
    }

    pub fn with_plasticity_threshold(mut self, threshold: f32) -> Self {
        self.plasticity_threshold = threshold;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: f32) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    pub fn with_strength_bounds(mut self, min: f32, max: f32) -> Self {
        self.min_synaptic_strength = min;
        self.max_synaptic_strength = max;
        self
    }

    pub fn with_initial_connectivity(mut self, per_neuron: usize) -> Self {
        self.initial_connectivity = per_neuron;
        self
    }

    pub fn with_grace_period(mut self, steps: u32) -> Self {
        self.grace_period = Some(steps);
        self
    }

    /// Saturates; `validate` rejects sizes whose sum overflows.
    pub fn neuron_count(&self) -> usize {
        self.input_size
            .saturating_add(self.hidden_size)
            .saturating_add(self.output_size)
    }

    /// Grace period in steps, falling back to the temporal window.
    pub fn effective_grace_period(&self) -> u32 {
        self.grace_period
            .unwrap_or_else(|| u32::try_from(self.temporal_window).unwrap_or(u32::MAX))
    }

    /// Smoothing factor of the feedback EMA.
    pub fn feedback_smoothing(&self) -> f32 {
        1.0 - self.decay_rate
    }

    /// Check numeric ranges. Violations are fatal at construction only.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let count = self
            .input_size
            .checked_add(self.hidden_size)
            .and_then(|n| n.checked_add(self.output_size))
            .ok_or(ConfigError::TooManyNeurons(usize::MAX))?;
        if count == 0 {
            return Err(ConfigError::EmptyNetwork);
        }
        if count > u32::MAX as usize {
            return Err(ConfigError::TooManyNeurons(count));
        }
        if self.temporal_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.performance_history_size == 0 {
            return Err(ConfigError::ZeroHistory);
        }

        let floats = [
            ("learning_rate", self.learning_rate),
            ("modulation_rate", self.modulation_rate),
            ("plasticity_threshold", self.plasticity_threshold),
            ("decay_rate", self.decay_rate),
            ("max_synaptic_strength", self.max_synaptic_strength),
            ("min_synaptic_strength", self.min_synaptic_strength),
            ("trace_decay", self.trace_decay),
            ("quiet_weight_threshold", self.quiet_weight_threshold),
        ];
        for (field, value) in floats {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(field));
            }
        }

        for (field, value) in [
            ("learning_rate", self.learning_rate),
            ("modulation_rate", self.modulation_rate),
            ("plasticity_threshold", self.plasticity_threshold),
            ("min_synaptic_strength", self.min_synaptic_strength),
            ("quiet_weight_threshold", self.quiet_weight_threshold),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }

        if self.min_synaptic_strength > self.max_synaptic_strength {
            return Err(ConfigError::InvertedBounds {
                min: self.min_synaptic_strength,
                max: self.max_synaptic_strength,
            });
        }
        // 1.0 would zero the feedback smoothing factor.
        if self.decay_rate <= 0.0 || self.decay_rate >= 1.0 {
            return Err(ConfigError::OutOfUnitRange {
                field: "decay_rate",
                value: self.decay_rate,
            });
        }
        if self.trace_decay <= 0.0 || self.trace_decay > 1.0 {
            return Err(ConfigError::OutOfUnitRange {
                field: "trace_decay",
                value: self.trace_decay,
            });
        }
        if self.learning_rate > 1.0 {
            return Err(ConfigError::OutOfUnitRange {
                field: "learning_rate",
                value: self.learning_rate,
            });
        }
        if self.effective_grace_period() == 0 {
            return Err(ConfigError::ZeroGracePeriod);
        }
        Ok(())
    }
}
