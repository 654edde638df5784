//! Reward-modulated plasticity.
//!
//! Three-factor rule: a Hebbian co-activation term feeds each synapse's
//! eligibility trace, and the smoothed feedback signal turns eligible traces
//! into weight changes:
//!
//! ```text
//! trace  <- trace * trace_decay + a_src * a_dst
//! delta  =  modulation_rate * r * trace      (only if |trace| >= plasticity_threshold)
//! weight <- clip(weight * decay_rate + delta, min, max)
//! ```

use crate::config::NetworkConfig;
use crate::stability::StabilityController;
use crate::synapse::Synapse;
use crate::temporal::ActivationSnapshot;

/// Saturation bound for eligibility traces.
pub const TRACE_LIMIT: f32 = 1.0e6;

/// Which quantity went non-finite during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Trace,
    Delta,
}

/// Per-synapse result of one modulation step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SynapseUpdate {
    /// The plasticity gate was open and a delta was applied.
    pub modulated: bool,
    /// Set when a non-finite value was replaced by a safe substitute.
    pub instability: Option<Quantity>,
    /// The stability controller considers the synapse removable.
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationEngine {
    modulation_rate: f32,
    trace_decay: f32,
    plasticity_threshold: f32,
}

impl ModulationEngine {
    pub fn new(cfg: &NetworkConfig) -> Self {
        Self {
            modulation_rate: cfg.modulation_rate,
            trace_decay: cfg.trace_decay,
            plasticity_threshold: cfg.plasticity_threshold,
        }
    }

    /// Decay the trace and add the co-activation term.
    ///
    /// Returns the new trace and whether a substitution happened.
    #[inline]
    pub fn next_trace(&self, trace: f32, co_activation: f32) -> (f32, bool) {
        let decayed = trace * self.trace_decay;
        let decayed = if decayed.is_finite() { decayed } else { 0.0 };
        let raw = decayed + co_activation;
        if raw.is_finite() {
            (raw.clamp(-TRACE_LIMIT, TRACE_LIMIT), false)
        } else {
            (decayed.clamp(-TRACE_LIMIT, TRACE_LIMIT), true)
        }
    }

    /// The plasticity gate.
    #[inline]
    pub fn is_eligible(&self, trace: f32) -> bool {
        trace.abs() >= self.plasticity_threshold
    }

    /// Weight delta for an eligible trace. `None` when the product is not finite.
    #[inline]
    pub fn delta(&self, signal: f32, trace: f32) -> Option<f32> {
        let d = self.modulation_rate * signal * trace;
        d.is_finite().then_some(d)
    }

    /// Run the full per-step rule on one synapse.
    ///
    /// Only touches `synapse`, so distinct synapses may be updated concurrently.
    pub fn update(
        &self,
        synapse: &mut Synapse,
        latest: Option<&ActivationSnapshot>,
        signal: f32,
        stability: &StabilityController,
    ) -> SynapseUpdate {
        let mut out = SynapseUpdate::default();

        let co_activation = latest.map_or(0.0, |snap| {
            snap.activation(synapse.source) * snap.activation(synapse.target)
        });
        let (trace, substituted) = self.next_trace(synapse.trace, co_activation);
        synapse.trace = trace;
        if substituted {
            out.instability = Some(Quantity::Trace);
        }

        let mut delta = 0.0;
        if signal != 0.0 && self.is_eligible(trace) {
            match self.delta(signal, trace) {
                Some(d) => {
                    delta = d;
                    out.modulated = true;
                }
                None => out.instability = Some(Quantity::Delta),
            }
        }

        out.flagged = stability.apply(synapse, delta);
        synapse.age = synapse.age.saturating_add(1);
        out
    }
}
