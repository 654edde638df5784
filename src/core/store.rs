//! Persistence boundaries.
//!
//! The network never talks to a database directly. It hands snapshots and
//! performance records to a [`StateStore`] / [`MetricsStore`] supplied by the
//! caller, and every failure comes back as a [`StoreError`].

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::feedback::PerformanceRecord;
use crate::state::NetworkState;

/// Keyed storage for network snapshots.
pub trait StateStore: Send + Sync {
    /// Persist `state` under `id`, replacing any previous snapshot.
    fn save(&self, id: &str, state: &NetworkState) -> Result<(), StoreError>;

    /// Most recent snapshot for `id`, or `None` if nothing was saved yet.
    fn load(&self, id: &str) -> Result<Option<NetworkState>, StoreError>;
}

/// Append-only performance log.
pub trait MetricsStore: Send + Sync {
    fn append(&self, id: &str, record: &PerformanceRecord) -> Result<(), StoreError>;

    /// Up to `limit` records for `id`, most recent first.
    fn history(&self, id: &str, limit: usize) -> Result<Vec<PerformanceRecord>, StoreError>;
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} store is offline"))
}

/// Process-local [`StateStore`].
#[derive(Debug)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, NetworkState>>,
    available: RwLock<bool>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            available: RwLock::new(true),
        }
    }

    /// Simulate an outage; every call fails with [`StoreError::Unavailable`]
    /// while `false`.
    pub fn set_available(&self, available: bool) {
        *self.available.write() = available;
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl StateStore for InMemoryStateStore {
    fn save(&self, id: &str, state: &NetworkState) -> Result<(), StoreError> {
        if !*self.available.read() {
            return Err(unavailable("state"));
        }
        self.states.write().insert(id.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<NetworkState>, StoreError> {
        if !*self.available.read() {
            return Err(unavailable("state"));
        }
        Ok(self.states.read().get(id).cloned())
    }
}

/// Process-local [`MetricsStore`], optionally capped per id.
#[derive(Debug)]
pub struct InMemoryMetricsStore {
    logs: RwLock<HashMap<String, VecDeque<PerformanceRecord>>>,
    cap: Option<usize>,
    available: RwLock<bool>,
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            cap: None,
            available: RwLock::new(true),
        }
    }

    /// Keep at most `cap` records per id, dropping the oldest.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: Some(cap.max(1)),
            ..Self::new()
        }
    }

    pub fn set_available(&self, available: bool) {
        *self.available.write() = available;
    }

    pub fn len(&self, id: &str) -> usize {
        self.logs.read().get(id).map_or(0, |log| log.len())
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn append(&self, id: &str, record: &PerformanceRecord) -> Result<(), StoreError> {
        if !*self.available.read() {
            return Err(unavailable("metrics"));
        }
        let mut logs = self.logs.write();
        let log = logs.entry(id.to_string()).or_default();
        if let Some(cap) = self.cap {
            while log.len() >= cap {
                log.pop_front();
            }
        }
        log.push_back(record.clone());
        Ok(())
    }

    fn history(&self, id: &str, limit: usize) -> Result<Vec<PerformanceRecord>, StoreError> {
        if !*self.available.read() {
            return Err(unavailable("metrics"));
        }
        Ok(self
            .logs
            .read()
            .get(id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
