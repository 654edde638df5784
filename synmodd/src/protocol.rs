//! JSON-lines request/response protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use synmod::feedback::PerformanceRecord;
use synmod::network::Stimulus;
use synmod::neuron::NeuronId;
use synmod::observer::Diagnostics;
use synmod::state::NetworkState;
use tokio::sync::RwLock;
use tracing::warn;

use crate::driver::{Driver, StepSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Step {
        inputs: Vec<f32>,
        #[serde(default)]
        clamp: Vec<(NeuronId, f32)>,
        performance: f32,
        #[serde(default)]
        metrics: BTreeMap<String, f32>,
    },
    Diagnostics,
    Snapshot,
    Save,
    History {
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    Shutdown,
}

fn default_history_limit() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Step(StepSummary),
    Diagnostics(Diagnostics),
    Snapshot(NetworkState),
    History { records: Vec<PerformanceRecord> },
    Success { message: String },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Serve one request. `Shutdown` persists and reports; exiting is the
/// caller's job.
pub async fn handle_request(driver: &Arc<RwLock<Driver>>, request: Request) -> Response {
    match request {
        Request::Step {
            inputs,
            clamp,
            performance,
            metrics,
        } => {
            let stimulus = Stimulus {
                inputs,
                clamps: clamp,
            };
            let mut d = driver.write().await;
            let report = d.step(&stimulus, performance, metrics);
            Response::Step(StepSummary::from(&report))
        }
        Request::Diagnostics => Response::Diagnostics(driver.read().await.network().diagnostics()),
        Request::Snapshot => Response::Snapshot(driver.read().await.network().snapshot()),
        Request::Save => {
            let mut d = driver.write().await;
            match d.persist_and_settle().await {
                Ok(()) => Response::Success {
                    message: format!("saved at step {}", d.network().step_count()),
                },
                Err(e) => Response::error(format!("save failed: {e}")),
            }
        }
        Request::History { limit } => {
            let (store, id) = {
                let d = driver.read().await;
                (d.metrics_store(), d.network_id().to_string())
            };
            match tokio::task::spawn_blocking(move || store.history(&id, limit)).await {
                Ok(Ok(records)) => Response::History { records },
                Ok(Err(e)) => Response::error(format!("history unavailable: {e}")),
                Err(e) => {
                    warn!("history task failed: {e}");
                    Response::error("history task failed")
                }
            }
        }
        Request::Shutdown => {
            let mut d = driver.write().await;
            match d.persist_and_settle().await {
                Ok(()) => Response::Success {
                    message: "Shutting down".to_string(),
                },
                Err(e) => Response::error(format!("Shutting down; final save failed: {e}")),
            }
        }
    }
}
