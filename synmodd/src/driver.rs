//! Owns the network inside the daemon and schedules persistence.
//!
//! Saves and metrics flushes are handed to the blocking pool against a copy
//! taken at a step boundary; stepping never waits on them. Saves are chained
//! so they reach the store in step order.

use std::collections::BTreeMap;
use std::sync::Arc;

use synmod::network::{Network, PassSummary, StepReport, Stimulus};
use synmod::observer::{Diagnostic, DiagnosticSink};
use synmod::state::NetworkState;
use synmod::error::StoreError;
use synmod::store::{MetricsStore, StateStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{DaemonConfig, DaemonError, TrainingConfig};

/// Wire form of a [`StepReport`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StepSummary {
    pub step: u64,
    pub signal: f32,
    pub modulated: usize,
    pub flagged: usize,
    pub instabilities: usize,
    pub pass: Option<PassSummary>,
    pub rolled_back: bool,
    pub rollback_reason: Option<String>,
}

impl From<&StepReport> for StepSummary {
    fn from(r: &StepReport) -> Self {
        Self {
            step: r.step,
            signal: r.signal,
            modulated: r.modulated,
            flagged: r.flagged,
            instabilities: r.instabilities,
            pass: r.pass,
            rolled_back: r.rolled_back,
            rollback_reason: r.rollback_reason.as_ref().map(|r| format!("{r:?}")),
        }
    }
}

pub struct Driver {
    network: Network,
    network_id: String,
    training: TrainingConfig,
    states: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsStore>,
    sink: Arc<dyn DiagnosticSink>,

    since_save: u64,
    since_flush: u64,
    in_flight: Vec<JoinHandle<()>>,
    last_save: Option<JoinHandle<Result<(), StoreError>>>,
}

impl Driver {
    /// Resume the last saved state for the configured id, or start fresh.
    pub fn open(
        cfg: &DaemonConfig,
        states: Arc<dyn StateStore>,
        metrics: Arc<dyn MetricsStore>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, DaemonError> {
        let id = cfg.storage.network_id.clone();
        let network = match states.load(&id) {
            Ok(Some(state)) => {
                info!(network_id = %id, step = state.step, "resuming saved network");
                Network::from_state_with_sink(cfg.network.clone(), &state, Arc::clone(&sink))?
            }
            Ok(None) => {
                info!(network_id = %id, "no saved network; starting fresh");
                Network::with_sink(cfg.network.clone(), Arc::clone(&sink))?
            }
            Err(error) => {
                sink.emit(&Diagnostic::StorageUnavailable {
                    operation: "load",
                    error,
                });
                Network::with_sink(cfg.network.clone(), Arc::clone(&sink))?
            }
        };

        Ok(Self {
            network,
            network_id: id,
            training: cfg.training.clone(),
            states,
            metrics,
            sink,
            since_save: 0,
            since_flush: 0,
            in_flight: Vec::new(),
            last_save: None,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn metrics_store(&self) -> Arc<dyn MetricsStore> {
        Arc::clone(&self.metrics)
    }

    /// Run one step and schedule any persistence it makes due.
    ///
    /// Must be called from within a tokio runtime.
    pub fn step(
        &mut self,
        stimulus: &Stimulus,
        performance: f32,
        metrics: BTreeMap<String, f32>,
    ) -> StepReport {
        let report = self.network.step_with_metrics(stimulus, performance, metrics);
        self.in_flight.retain(|h| !h.is_finished());
        if report.rolled_back {
            return report;
        }

        self.since_save += 1;
        self.since_flush += 1;
        if self.since_flush >= self.training.flush_interval {
            self.flush_in_background();
        }
        if self.since_save >= self.training.save_interval {
            self.save_in_background();
        }
        report
    }

    /// Fire-and-forget save of the current snapshot. Starts once the
    /// previous save has finished.
    pub fn save_in_background(&mut self) {
        self.since_save = 0;
        let state = self.network.snapshot();
        let handle = spawn_save(
            self.last_save.take(),
            Arc::clone(&self.states),
            Arc::clone(&self.sink),
            self.network_id.clone(),
            state,
        );
        self.last_save = Some(handle);
    }

    /// Fire-and-forget flush of pending performance records.
    pub fn flush_in_background(&mut self) {
        self.since_flush = 0;
        let records = self.network.drain_metrics();
        if records.is_empty() {
            return;
        }
        let store = Arc::clone(&self.metrics);
        let sink = Arc::clone(&self.sink);
        let id = self.network_id.clone();
        self.in_flight.push(tokio::task::spawn_blocking(move || {
            for (i, record) in records.iter().enumerate() {
                if let Err(error) = store.append(&id, record) {
                    warn!(lost = records.len() - i, "metrics flush aborted");
                    sink.emit(&Diagnostic::StorageUnavailable {
                        operation: "append",
                        error,
                    });
                    return;
                }
            }
        }));
    }

    /// Flush, save, and wait for every outstanding persistence task.
    /// Returns the outcome of the save of the current snapshot.
    pub async fn persist_and_settle(&mut self) -> Result<(), StoreError> {
        self.flush_in_background();
        self.save_in_background();
        self.settle().await
    }

    /// Wait for outstanding persistence tasks. Returns the outcome of the
    /// most recent save, or `Ok` if none was pending.
    pub async fn settle(&mut self) -> Result<(), StoreError> {
        for handle in self.in_flight.drain(..) {
            if let Err(e) = handle.await {
                warn!("persistence task failed: {e}");
            }
        }
        match self.last_save.take() {
            Some(handle) => join_save(handle).await,
            None => Ok(()),
        }
    }

    pub fn in_flight(&self) -> usize {
        let saving = self.last_save.as_ref().is_some_and(|h| !h.is_finished());
        self.in_flight.iter().filter(|h| !h.is_finished()).count() + usize::from(saving)
    }
}

async fn join_save(handle: JoinHandle<Result<(), StoreError>>) -> Result<(), StoreError> {
    handle
        .await
        .unwrap_or_else(|e| Err(StoreError::Unavailable(format!("save task failed: {e}"))))
}

fn spawn_save(
    previous: Option<JoinHandle<Result<(), StoreError>>>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn DiagnosticSink>,
    id: String,
    state: NetworkState,
) -> JoinHandle<Result<(), StoreError>> {
    tokio::spawn(async move {
        // An earlier failure was already reported by its own task.
        if let Some(previous) = previous {
            let _ = join_save(previous).await;
        }
        let saved = tokio::task::spawn_blocking(move || {
            store.save(&id, &state).inspect_err(|error| {
                sink.emit(&Diagnostic::StorageUnavailable {
                    operation: "save",
                    error: error.clone(),
                });
            })
        });
        join_save(saved).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use synmod::config::NetworkConfig;
    use synmod::observer::RecordingSink;
    use synmod::store::{InMemoryMetricsStore, InMemoryStateStore};

    fn config() -> DaemonConfig {
        let mut cfg = DaemonConfig::default();
        cfg.network = NetworkConfig::with_sizes(2, 3, 1)
            .with_initial_connectivity(2)
            .with_seed(8);
        cfg.training.save_interval = 3;
        cfg.training.flush_interval = 2;
        cfg.storage.network_id = "test".into();
        cfg
    }

    #[tokio::test]
    async fn saves_and_flushes_on_schedule() {
        let states = Arc::new(InMemoryStateStore::new());
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let sink = RecordingSink::new();
        let mut driver = Driver::open(&config(), states.clone(), metrics.clone(), sink.clone()).unwrap();

        for _ in 0..3 {
            driver.step(&Stimulus::new(vec![0.5, 0.1]), 0.2, BTreeMap::new());
        }
        driver.settle().await.unwrap();

        let saved = states.load("test").unwrap().expect("saved after 3 steps");
        assert_eq!(saved.step, 3);
        assert_eq!(metrics.len("test"), 2);

        driver.persist_and_settle().await.unwrap();
        assert_eq!(metrics.len("test"), 3);
        assert_eq!(driver.in_flight(), 0);
    }

    #[tokio::test]
    async fn back_to_back_saves_land_in_step_order() {
        let states = Arc::new(InMemoryStateStore::new());
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let mut driver =
            Driver::open(&config(), states.clone(), metrics, RecordingSink::new()).unwrap();

        for _ in 0..4 {
            driver.step(&Stimulus::new(vec![0.4, 0.6]), 0.3, BTreeMap::new());
            driver.save_in_background();
        }
        driver.persist_and_settle().await.unwrap();
        assert_eq!(states.load("test").unwrap().unwrap().step, 4);
        assert_eq!(driver.in_flight(), 0);
    }

    #[tokio::test]
    async fn reopening_resumes_saved_state() {
        let states = Arc::new(InMemoryStateStore::new());
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let sink = RecordingSink::new();

        let mut first = Driver::open(&config(), states.clone(), metrics.clone(), sink.clone()).unwrap();
        for _ in 0..5 {
            first.step(&Stimulus::new(vec![0.3, 0.9]), 0.7, BTreeMap::new());
        }
        first.persist_and_settle().await.unwrap();
        let expected = first.network().snapshot();

        let second = Driver::open(&config(), states, metrics, sink).unwrap();
        assert_eq!(second.network().snapshot(), expected);
    }

    #[tokio::test]
    async fn failed_saves_are_reported_and_stepping_continues() {
        let states = Arc::new(InMemoryStateStore::new());
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let sink = RecordingSink::new();
        let mut driver = Driver::open(&config(), states.clone(), metrics.clone(), sink.clone()).unwrap();

        states.set_available(false);
        metrics.set_available(false);
        for _ in 0..6 {
            let report = driver.step(&Stimulus::new(vec![1.0, 0.0]), 0.1, BTreeMap::new());
            assert!(!report.rolled_back);
        }
        assert!(matches!(driver.settle().await, Err(StoreError::Unavailable(_))));

        assert!(sink.count(|e| matches!(e, Diagnostic::StorageUnavailable { .. })) >= 2);
        assert_eq!(driver.network().step_count(), 6);
    }

    #[tokio::test]
    async fn rolled_back_steps_do_not_count_toward_saves() {
        let states = Arc::new(InMemoryStateStore::new());
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let mut driver = Driver::open(
            &config(),
            states.clone(),
            metrics,
            RecordingSink::new(),
        )
        .unwrap();

        for _ in 0..5 {
            driver.step(&Stimulus::empty(), f32::NAN, BTreeMap::new());
        }
        driver.settle().await.unwrap();
        assert!(states.load("test").unwrap().is_none());
    }
}
