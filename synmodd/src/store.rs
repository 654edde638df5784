//! File-backed stores.
//!
//! States: one binary image per network id, `<collection>/<id>.smi`, written
//! through a temp file and renamed into place, plus a small `<id>.meta.json`.
//! Metrics: JSON lines, `<collection>/<id>.jsonl`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use synmod::error::StoreError;
use synmod::feedback::PerformanceRecord;
use synmod::state::NetworkState;
use synmod::store::{MetricsStore, StateStore};
use tracing::{debug, warn};

/// Sidecar document written next to every state image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    pub network_id: String,
    pub last_updated: DateTime<Utc>,
    pub step: u64,
    pub image_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetricsLine {
    network_id: String,
    #[serde(flatten)]
    record: PerformanceRecord,
}

/// Network ids become file names; keep them to a safe alphabet.
fn checked_id(id: &str) -> Result<&str, StoreError> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(id)
    } else {
        Err(StoreError::Unavailable(format!("invalid network id {id:?}")))
    }
}

fn io_unavailable(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}

#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    // Held across image and meta writes so a save lands as a unit.
    write_lock: Mutex<()>,
    tmp_seq: AtomicU64,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        }
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.smi"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.meta.json"))
    }

    pub fn meta(&self, id: &str) -> Result<Option<StateMeta>, StoreError> {
        let path = self.meta_path(checked_id(id)?);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| io_unavailable(&path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_unavailable(path, e)
        })
    }
}

impl StateStore for FileStateStore {
    fn save(&self, id: &str, state: &NetworkState) -> Result<(), StoreError> {
        let id = checked_id(id)?;
        fs::create_dir_all(&self.root).map_err(|e| io_unavailable(&self.root, e))?;

        let bytes = state
            .to_image_bytes()
            .map_err(|e| StoreError::Corrupt(format!("encode failed: {e}")))?;
        let path = self.image_path(id);
        let _guard = self.write_lock.lock();
        self.write_atomic(&path, &bytes)?;

        let meta = StateMeta {
            network_id: id.to_string(),
            last_updated: Utc::now(),
            step: state.step,
            image_bytes: bytes.len() as u64,
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StoreError::Corrupt(format!("meta encode failed: {e}")))?;
        self.write_atomic(&self.meta_path(id), &json)?;

        debug!(network_id = id, step = state.step, bytes = bytes.len(), "state saved");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<NetworkState>, StoreError> {
        let path = self.image_path(checked_id(id)?);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_unavailable(&path, e)),
        };
        let mut reader = BufReader::new(file);
        NetworkState::load_image_from(&mut reader)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug)]
pub struct FileMetricsStore {
    root: PathBuf,
    // Serializes appends from concurrent flush tasks.
    write_lock: Mutex<()>,
}

impl FileMetricsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn log_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.jsonl"))
    }
}

impl MetricsStore for FileMetricsStore {
    fn append(&self, id: &str, record: &PerformanceRecord) -> Result<(), StoreError> {
        let id = checked_id(id)?;
        let line = MetricsLine {
            network_id: id.to_string(),
            record: record.clone(),
        };
        let mut json = serde_json::to_vec(&line)
            .map_err(|e| StoreError::Corrupt(format!("record encode failed: {e}")))?;
        json.push(b'\n');

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.root).map_err(|e| io_unavailable(&self.root, e))?;
        let path = self.log_path(id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_unavailable(&path, e))?;
        let mut w = BufWriter::new(file);
        w.write_all(&json)
            .and_then(|_| w.flush())
            .map_err(|e| io_unavailable(&path, e))
    }

    fn history(&self, id: &str, limit: usize) -> Result<Vec<PerformanceRecord>, StoreError> {
        let path = self.log_path(checked_id(id)?);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_unavailable(&path, e)),
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_unavailable(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricsLine>(&line) {
                Ok(entry) => records.push(entry.record),
                Err(e) => warn!(path = %path.display(), line = n + 1, "skipping bad metrics line: {e}"),
            }
        }
        Ok(records.into_iter().rev().take(limit).collect())
    }
}
