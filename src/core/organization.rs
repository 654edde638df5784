//! Unsupervised restructuring: pruning, correlation-driven growth and role
//! reassignment.
//!
//! A pass is split into [`SelfOrganizationEngine::plan`], which only reads the
//! table and the temporal window as they stood when the pass began, and
//! [`SelfOrganizationEngine::apply`], the single writer that mutates topology.

use std::collections::BTreeSet;

use crate::config::NetworkConfig;
use crate::error::SynapseError;
use crate::neuron::{Neuron, NeuronId, Role};
use crate::synapse::{Synapse, SynapseKey, SynapseTable, Weight};
use crate::temporal::TemporalBuffer;

/// Variance below which a series counts as constant.
const FLAT_VARIANCE: f32 = 1.0e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Growth {
    pub key: SynapseKey,
    pub correlation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub id: NeuronId,
    pub from: Role,
    pub to: Role,
}

/// Structural decisions for one pass, computed against a frozen view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReorganizationPlan {
    pub prune: Vec<SynapseKey>,
    pub grow: Vec<Growth>,
    pub reassign: Vec<RoleChange>,
}

/// What a pass actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub pruned: Vec<Synapse>,
    pub grown: Vec<Growth>,
    pub role_changes: Vec<RoleChange>,
    pub conflicts: Vec<SynapseError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfOrganizationEngine {
    threshold: f32,
    initial_weight: Weight,
    grace_period: u32,
    reactivation_degree: usize,
}

impl SelfOrganizationEngine {
    pub fn new(cfg: &NetworkConfig) -> Self {
        Self {
            threshold: cfg.plasticity_threshold,
            initial_weight: cfg.min_synaptic_strength,
            grace_period: cfg.effective_grace_period(),
            reactivation_degree: cfg.reactivation_degree,
        }
    }

    pub fn plan(
        &self,
        neurons: &[Neuron],
        table: &SynapseTable,
        buffer: &TemporalBuffer,
        flagged: &[SynapseKey],
    ) -> ReorganizationPlan {
        let mut prune: Vec<SynapseKey> = flagged
            .iter()
            .copied()
            .filter(|k| table.contains(k.source, k.target))
            .collect();
        prune.sort();
        prune.dedup();

        let grow = self.plan_growth(neurons, table, buffer);
        let reassign = self.plan_reassignment(neurons, table, &prune, &grow);

        ReorganizationPlan {
            prune,
            grow,
            reassign,
        }
    }

    fn plan_growth(
        &self,
        neurons: &[Neuron],
        table: &SynapseTable,
        buffer: &TemporalBuffer,
    ) -> Vec<Growth> {
        let mut ids: BTreeSet<NeuronId> = BTreeSet::new();
        for snap in buffer.window() {
            ids.extend(snap.ids());
        }
        let role_of = |id: NeuronId| neurons.get(id as usize).map(|n| n.role);

        // Neurons that fired at least once in the window.
        let active: Vec<(NeuronId, Role)> = ids
            .into_iter()
            .filter_map(|id| {
                let role = role_of(id)?;
                let fired = buffer
                    .window()
                    .any(|snap| snap.get(id).is_some_and(|a| a != 0.0));
                fired.then_some((id, role))
            })
            .collect();

        let mut grow = Vec::new();
        for (i, &(a, role_a)) in active.iter().enumerate() {
            for &(b, role_b) in &active[i + 1..] {
                if table.connected(a, b) {
                    continue;
                }
                let key = orient(a, role_a, b, role_b);
                if role_of(key.target) == Some(Role::Input) {
                    continue;
                }
                let (xs, ys) = buffer.paired_series(a, b);
                let correlation = correlation(&xs, &ys);
                if correlation > self.threshold {
                    grow.push(Growth { key, correlation });
                }
            }
        }
        grow
    }

    fn plan_reassignment(
        &self,
        neurons: &[Neuron],
        table: &SynapseTable,
        prune: &[SynapseKey],
        grow: &[Growth],
    ) -> Vec<RoleChange> {
        let mut out = Vec::new();
        // Ascending id order.
        for n in neurons {
            match n.role {
                Role::Hidden if n.quiet_steps >= self.grace_period => out.push(RoleChange {
                    id: n.id,
                    from: Role::Hidden,
                    to: Role::Dynamic,
                }),
                Role::Dynamic => {
                    let removed = prune
                        .iter()
                        .filter(|k| k.source == n.id || k.target == n.id)
                        .count();
                    let added = grow
                        .iter()
                        .filter(|g| g.key.source == n.id || g.key.target == n.id)
                        .count();
                    let projected = (table.degree(n.id) + added).saturating_sub(removed);
                    if projected >= self.reactivation_degree {
                        out.push(RoleChange {
                            id: n.id,
                            from: Role::Dynamic,
                            to: Role::Hidden,
                        });
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Apply a plan. The only place topology and roles are mutated.
    pub fn apply(
        &self,
        plan: ReorganizationPlan,
        neurons: &mut [Neuron],
        table: &mut SynapseTable,
    ) -> PassReport {
        let mut report = PassReport::default();

        for key in plan.prune {
            if let Some(s) = table.remove(key.source, key.target) {
                report.pruned.push(s);
            }
        }

        for g in plan.grow {
            let synapse = Synapse::new(g.key.source, g.key.target, self.initial_weight, 0.0);
            match table.insert(synapse) {
                Ok(()) => report.grown.push(g),
                Err(e) => report.conflicts.push(e),
            }
        }

        for change in plan.reassign {
            if let Some(n) = neurons.get_mut(change.id as usize) {
                if n.role == change.from && n.role.is_reassignable() {
                    n.role = change.to;
                    n.quiet_steps = 0;
                    report.role_changes.push(change);
                }
            }
        }

        report
    }
}

/// Orient a grown synapse from the lower layer rank to the higher one,
/// breaking ties by ascending id.
fn orient(a: NeuronId, role_a: Role, b: NeuronId, role_b: Role) -> SynapseKey {
    match role_a.rank().cmp(&role_b.rank()) {
        core::cmp::Ordering::Less => SynapseKey::new(a, b),
        core::cmp::Ordering::Greater => SynapseKey::new(b, a),
        core::cmp::Ordering::Equal if a < b => SynapseKey::new(a, b),
        core::cmp::Ordering::Equal => SynapseKey::new(b, a),
    }
}

/// Pearson correlation of two equally long series.
///
/// Two flat series fall back to cosine similarity of the raw values, so two
/// neurons held at the same constant non-zero level count as perfectly
/// correlated. Fewer than two samples, or one flat and one varying series,
/// yield zero.
pub fn correlation(xs: &[f32], ys: &[f32]) -> f32 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let nf = n as f32;
    let mean_x = xs[..n].iter().sum::<f32>() / nf;
    let mean_y = ys[..n].iter().sum::<f32>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let flat_x = var_x / nf <= FLAT_VARIANCE;
    let flat_y = var_y / nf <= FLAT_VARIANCE;
    let r = match (flat_x, flat_y) {
        (false, false) => cov / (var_x * var_y).sqrt(),
        (true, true) => {
            let dot: f32 = xs[..n].iter().zip(&ys[..n]).map(|(x, y)| x * y).sum();
            let nx: f32 = xs[..n].iter().map(|x| x * x).sum();
            let ny: f32 = ys[..n].iter().map(|y| y * y).sum();
            let denom = (nx * ny).sqrt();
            if denom > 0.0 {
                dot / denom
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
