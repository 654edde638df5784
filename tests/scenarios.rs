use std::collections::BTreeMap;

use synmod::prelude::*;

fn lock_step_config() -> NetworkConfig {
    NetworkConfig::with_sizes(2, 3, 1)
        .with_plasticity_threshold(0.3)
        .with_decay_rate(0.95)
        .with_initial_connectivity(0)
        .with_seed(5)
}

fn lock_step_value(step: usize) -> f32 {
    0.75 + 0.15 * (step as f32 * 0.9).sin()
}

#[test]
fn lock_step_hidden_pair_grows_and_strengthens() {
    let sink = RecordingSink::new();
    let mut net = Network::with_sink(lock_step_config(), sink.clone()).unwrap();
    let initial = net.config().min_synaptic_strength;

    for step in 1..=50 {
        let v = lock_step_value(step);
        let stim = Stimulus::new(vec![0.0, 0.0]).clamp(2, v).clamp(3, v);
        let report = net.step(&stim, 1.0);
        assert!(!report.rolled_back, "step {step} rolled back");
    }

    let s = net
        .synapses()
        .get(2, 3)
        .expect("lock-step pair should be connected");
    assert!(s.trace >= 0.3, "trace {}", s.trace);
    assert!(s.weight > initial, "weight {}", s.weight);
    assert!(s.weight <= net.config().max_synaptic_strength);

    let grown: Vec<SynapseKey> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            Diagnostic::SynapseGrown { key, .. } => Some(*key),
            _ => None,
        })
        .collect();
    assert_eq!(grown, vec![SynapseKey::new(2, 3)]);
}

#[test]
fn isolated_hidden_neuron_turns_dynamic_once_at_pass_boundary() {
    let sink = RecordingSink::new();
    let cfg = NetworkConfig::with_sizes(2, 3, 1)
        .with_window(5)
        .with_initial_connectivity(0);
    let mut net = Network::with_sink(cfg, sink.clone()).unwrap();

    for step in 1..=15u64 {
        let report = net.step(&Stimulus::empty(), 0.0);
        if step < 5 {
            assert_eq!(net.role(2), Some(Role::Hidden), "step {step}");
            assert!(report.pass.is_none());
        } else {
            assert_eq!(net.role(2), Some(Role::Dynamic), "step {step}");
        }
        if step == 5 {
            assert_eq!(report.pass.map(|p| p.reassigned), Some(3));
        }
    }

    let changes_of_2 = sink.count(|e| {
        matches!(
            e,
            Diagnostic::RoleChanged {
                id: 2,
                from: Role::Hidden,
                to: Role::Dynamic,
                ..
            }
        )
    });
    assert_eq!(changes_of_2, 1);
    assert_eq!(
        sink.count(|e| matches!(e, Diagnostic::RoleChanged { step, .. } if *step != 5)),
        0
    );
    // Fixed roles never move.
    assert_eq!(net.role(0), Some(Role::Input));
    assert_eq!(net.role(5), Some(Role::Output));
}

#[test]
fn identical_series_over_full_window_grow_floor_synapse() {
    let cfg = NetworkConfig::with_sizes(1, 4, 1)
        .with_window(4)
        .with_initial_connectivity(0);
    let mut net = Network::new(cfg).unwrap();

    for step in 1..=4 {
        let v = [0.2, 0.9, 0.4, 0.7][step - 1];
        net.step(&Stimulus::new(vec![0.0]).clamp(2, v).clamp(4, v), 0.3);
    }

    assert_eq!(net.synapses().len(), 1);
    let s = net.synapses().get(2, 4).expect("synapse 2 -> 4");
    assert_eq!(s.weight, net.config().min_synaptic_strength);
    assert_eq!(s.trace, 0.0);
    assert!(net.synapses().get(4, 2).is_none());
}

#[test]
fn zero_feedback_only_decays() {
    let cfg = NetworkConfig::with_sizes(3, 6, 2)
        .with_initial_connectivity(3)
        .with_seed(17);
    let mut net = Network::new(cfg).unwrap();

    let mut prev: BTreeMap<SynapseKey, f32> = BTreeMap::new();
    for step in 0..40 {
        let x = step as f32;
        let stim = Stimulus::new(vec![x.sin(), (0.5 * x).cos(), 1.0]);
        let report = net.step(&stim, 0.0);
        assert_eq!(report.signal, 0.0);
        assert_eq!(report.modulated, 0);

        let now: BTreeMap<SynapseKey, f32> = net
            .synapses()
            .iter()
            .map(|s| (s.key(), s.weight))
            .collect();
        for (key, w) in &now {
            if let Some(before) = prev.get(key) {
                assert!(w.abs() <= before.abs(), "{key:?} grew {before} -> {w}");
            }
        }
        prev = now;
    }
}

#[test]
fn identical_histories_produce_identical_states() {
    let cfg = NetworkConfig::with_sizes(3, 8, 2)
        .with_initial_connectivity(3)
        .with_seed(99);
    let origin = Network::new(cfg.clone()).unwrap().snapshot();

    let mut a = Network::from_state(cfg.clone(), &origin).unwrap();
    let mut b = Network::from_state(cfg, &origin).unwrap();
    b.set_execution_tier(ExecutionTier::Parallel);

    for step in 0..60 {
        let x = step as f32;
        let stim = Stimulus::new(vec![(0.3 * x).sin(), (0.7 * x).cos(), 0.5]).clamp(4, (0.3 * x).sin());
        let perf = (0.11 * x).sin();
        let ra = a.step(&stim, perf);
        let rb = b.step(&stim, perf);
        assert_eq!(ra, rb);
    }

    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn rolled_back_step_leaves_no_trace() {
    let cfg = NetworkConfig::with_sizes(2, 4, 1)
        .with_initial_connectivity(2)
        .with_seed(3);
    let mut net = Network::new(cfg).unwrap();
    for _ in 0..3 {
        net.step(&Stimulus::new(vec![0.5, 0.5]), 0.4);
    }
    let before = net.snapshot();
    let history_before = net.feedback().history().len();

    let report = net.step(&Stimulus::new(vec![0.5, 0.5]), f32::INFINITY);
    assert!(report.rolled_back);
    assert_eq!(net.snapshot(), before);
    assert_eq!(net.feedback().history().len(), history_before);

    // The next good step commits as step 4.
    let report = net.step(&Stimulus::new(vec![0.5, 0.5]), 0.4);
    assert!(!report.rolled_back);
    assert_eq!(report.step, 4);
    assert_eq!(net.step_count(), 4);
}

#[test]
fn metrics_travel_with_performance_records() {
    let mut net = Network::new(NetworkConfig::with_sizes(1, 2, 1).with_initial_connectivity(0)).unwrap();
    let mut metrics = BTreeMap::new();
    metrics.insert("loss".to_string(), 0.25);
    net.step_with_metrics(&Stimulus::empty(), 0.75, metrics);

    let store = InMemoryMetricsStore::new();
    assert_eq!(net.flush_metrics(&store, "n").unwrap(), 1);
    let history = store.history("n", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].raw, 0.75);
    assert_eq!(history[0].metrics.get("loss"), Some(&0.25));
}
