use crate::config::NetworkConfig;
use crate::synapse::{Synapse, Weight};

/// Homeostatic bounds: multiplicative decay plus clipping, independent of
/// feedback polarity.
///
/// The controller flags synapses that have sat at the floor with a
/// sub-threshold trace for the grace period, but never removes them;
/// topology mutation belongs to the self-organization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityController {
    decay_rate: f32,
    min: Weight,
    max: Weight,
    plasticity_threshold: f32,
    grace_period: u32,
}

impl StabilityController {
    pub fn new(cfg: &NetworkConfig) -> Self {
        Self {
            decay_rate: cfg.decay_rate,
            min: cfg.min_synaptic_strength,
            max: cfg.max_synaptic_strength,
            plasticity_threshold: cfg.plasticity_threshold,
            grace_period: cfg.effective_grace_period(),
        }
    }

    pub fn min(&self) -> Weight {
        self.min
    }

    pub fn max(&self) -> Weight {
        self.max
    }

    /// `clip(weight * decay_rate + delta, min, max)`.
    ///
    /// A non-finite result falls back to the decay-only weight.
    #[inline]
    pub fn next_weight(&self, weight: Weight, delta: f32) -> Weight {
        let decayed = weight * self.decay_rate;
        let raw = decayed + delta;
        let raw = if raw.is_finite() { raw } else { decayed };
        self.clip(raw)
    }

    #[inline]
    pub fn clip(&self, weight: Weight) -> Weight {
        if weight.is_nan() {
            return self.min;
        }
        weight.clamp(self.min, self.max)
    }

    /// Apply the per-step rule to one synapse and advance its floor counter.
    ///
    /// Returns `true` when the synapse is (still) removable after this step.
    pub fn apply(&self, synapse: &mut Synapse, delta: f32) -> bool {
        synapse.weight = self.next_weight(synapse.weight, delta);
        self.track_floor(synapse)
    }

    fn track_floor(&self, synapse: &mut Synapse) -> bool {
        let at_floor = synapse.weight <= self.min;
        let quiet = synapse.trace.abs() < self.plasticity_threshold;
        if at_floor && quiet {
            synapse.floor_steps = synapse.floor_steps.saturating_add(1);
        } else {
            synapse.floor_steps = 0;
        }
        self.is_removable(synapse)
    }

    pub fn is_removable(&self, synapse: &Synapse) -> bool {
        synapse.floor_steps >= self.grace_period
    }

    pub fn in_bounds(&self, weight: Weight) -> bool {
        weight >= self.min && weight <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> StabilityController {
        StabilityController::new(
            &NetworkConfig::default()
                .with_strength_bounds(0.1, 2.0)
                .with_decay_rate(0.5)
                .with_grace_period(3),
        )
    }

    #[test]
    fn decay_is_applied_before_delta_and_clipped() {
        let c = controller();
        assert!((c.next_weight(1.0, 0.25) - 0.75).abs() < 1e-6);
        assert_eq!(c.next_weight(1.9, 10.0), 2.0);
        assert_eq!(c.next_weight(0.15, -5.0), 0.1);
    }

    #[test]
    fn large_positive_delta_cannot_escape_max() {
        let c = controller();
        let mut w = 0.1;
        for _ in 0..1000 {
            w = c.next_weight(w, 1.0e6);
            assert!(c.in_bounds(w));
        }
        assert_eq!(w, 2.0);
    }

    #[test]
    fn non_finite_delta_decays_only() {
        let c = controller();
        assert!((c.next_weight(1.0, f32::NAN) - 0.5).abs() < 1e-6);
        assert!((c.next_weight(1.0, f32::INFINITY) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn floor_synapse_flagged_after_grace_period() {
        let c = controller();
        let mut s = Synapse::new(0, 1, 0.1, 0.0);
        assert!(!c.apply(&mut s, 0.0));
        assert!(!c.apply(&mut s, 0.0));
        assert!(c.apply(&mut s, 0.0));
        assert_eq!(s.floor_steps, 3);
    }

    #[test]
    fn active_trace_resets_floor_counter() {
        let c = controller();
        let mut s = Synapse::new(0, 1, 0.1, 0.0);
        c.apply(&mut s, 0.0);
        c.apply(&mut s, 0.0);
        s.trace = 1.0;
        assert!(!c.apply(&mut s, 0.0));
        assert_eq!(s.floor_steps, 0);
    }
}
