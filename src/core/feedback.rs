use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;

/// One observation of task performance.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerformanceRecord {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub raw: f32,
    pub smoothed: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub metrics: BTreeMap<String, f32>,
}

/// The raw performance value was NaN or infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonFiniteFeedback(pub f32);

/// Turns raw per-step performance into the smoothed modulation signal and a
/// bounded performance history.
#[derive(Debug, Clone)]
pub struct FeedbackAggregator {
    alpha: f32,
    smoothed: f32,
    capacity: usize,
    history: VecDeque<PerformanceRecord>,

    // Records not yet handed to an external metrics store.
    pending: VecDeque<PerformanceRecord>,
    dropped_unflushed: u64,
}

impl FeedbackAggregator {
    pub fn new(cfg: &NetworkConfig) -> Self {
        let capacity = cfg.performance_history_size.max(1);
        Self {
            alpha: cfg.feedback_smoothing().clamp(0.0, 1.0),
            smoothed: 0.0,
            capacity,
            history: VecDeque::with_capacity(capacity),
            pending: VecDeque::new(),
            dropped_unflushed: 0,
        }
    }

    /// Current smoothed signal.
    pub fn signal(&self) -> f32 {
        self.smoothed
    }

    /// Override the smoothed signal (used when restoring a saved state).
    pub fn set_signal(&mut self, value: f32) {
        self.smoothed = value;
    }

    /// Fold one raw value into the EMA and record it.
    ///
    /// A non-finite raw value leaves the aggregator untouched.
    pub fn observe(
        &mut self,
        step: u64,
        raw: f32,
        metrics: BTreeMap<String, f32>,
    ) -> Result<f32, NonFiniteFeedback> {
        if !raw.is_finite() {
            return Err(NonFiniteFeedback(raw));
        }
        let next = self.smoothed + self.alpha * (raw - self.smoothed);
        if !next.is_finite() {
            return Err(NonFiniteFeedback(next));
        }
        self.smoothed = next;

        let record = PerformanceRecord {
            step,
            timestamp: Utc::now(),
            raw,
            smoothed: next,
            metrics,
        };
        push_bounded(&mut self.history, record.clone(), self.capacity);
        if self.pending.len() == self.capacity {
            self.dropped_unflushed += 1;
        }
        push_bounded(&mut self.pending, record, self.capacity);
        Ok(next)
    }

    /// In-memory history, oldest first, at most `performance_history_size` long.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &PerformanceRecord> + '_ {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&PerformanceRecord> {
        self.history.back()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records evicted before they could be flushed.
    pub fn dropped_unflushed(&self) -> u64 {
        self.dropped_unflushed
    }

    /// Hand over every record not yet flushed, oldest first.
    pub fn drain_unflushed(&mut self) -> Vec<PerformanceRecord> {
        self.pending.drain(..).collect()
    }

    /// Put records back after a failed flush, ahead of anything observed since.
    ///
    /// The pending queue stays bounded; overflow drops the oldest records.
    pub fn requeue_unflushed(&mut self, records: Vec<PerformanceRecord>) {
        for record in records.into_iter().rev() {
            if self.pending.len() == self.capacity {
                self.dropped_unflushed += 1;
                continue;
            }
            self.pending.push_front(record);
        }
    }

    /// Mean of the raw values currently in the history.
    pub fn mean_raw(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        let sum: f32 = self.history.iter().map(|r| r.raw).sum();
        Some(sum / self.history.len() as f32)
    }
}

fn push_bounded<T>(q: &mut VecDeque<T>, item: T, capacity: usize) {
    if q.len() == capacity {
        q.pop_front();
    }
    q.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(history: usize, decay_rate: f32) -> FeedbackAggregator {
        FeedbackAggregator::new(&NetworkConfig {
            performance_history_size: history,
            decay_rate,
            ..NetworkConfig::default()
        })
    }

    #[test]
    fn ema_uses_one_minus_decay_rate() {
        let mut agg = aggregator(10, 0.75);
        let s1 = agg.observe(1, 1.0, BTreeMap::new()).unwrap();
        assert!((s1 - 0.25).abs() < 1e-6);
        let s2 = agg.observe(2, 1.0, BTreeMap::new()).unwrap();
        assert!((s2 - 0.4375).abs() < 1e-6);
        assert_eq!(agg.signal(), s2);
    }

    #[test]
    fn history_is_bounded_and_evicts_oldest() {
        let mut agg = aggregator(3, 0.9);
        for step in 1..=5 {
            agg.observe(step, step as f32, BTreeMap::new()).unwrap();
        }
        let steps: Vec<u64> = agg.history().map(|r| r.step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
        assert_eq!(agg.latest().map(|r| r.raw), Some(5.0));
        assert_eq!(agg.dropped_unflushed(), 2);
    }

    #[test]
    fn drain_hands_over_pending_once() {
        let mut agg = aggregator(8, 0.9);
        let mut metrics = BTreeMap::new();
        metrics.insert("error".to_string(), 0.5);
        agg.observe(1, 0.2, metrics).unwrap();
        agg.observe(2, 0.4, BTreeMap::new()).unwrap();

        let drained = agg.drain_unflushed();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].metrics.get("error"), Some(&0.5));
        assert!(agg.drain_unflushed().is_empty());
        // History is unaffected by draining.
        assert_eq!(agg.history().len(), 2);
    }

    #[test]
    fn non_finite_raw_is_rejected_without_side_effects() {
        let mut agg = aggregator(4, 0.9);
        agg.observe(1, 1.0, BTreeMap::new()).unwrap();
        let before = agg.signal();
        assert!(agg.observe(2, f32::NAN, BTreeMap::new()).is_err());
        assert!(agg.observe(3, f32::INFINITY, BTreeMap::new()).is_err());
        assert_eq!(agg.signal(), before);
        assert_eq!(agg.history().len(), 1);
    }

    #[test]
    fn requeue_restores_order_and_respects_capacity() {
        let mut agg = aggregator(3, 0.9);
        agg.observe(1, 0.1, BTreeMap::new()).unwrap();
        agg.observe(2, 0.2, BTreeMap::new()).unwrap();
        let drained = agg.drain_unflushed();
        agg.observe(3, 0.3, BTreeMap::new()).unwrap();

        agg.requeue_unflushed(drained);
        let steps: Vec<u64> = agg.drain_unflushed().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);

        agg.observe(4, 0.4, BTreeMap::new()).unwrap();
        agg.observe(5, 0.5, BTreeMap::new()).unwrap();
        let older = vec![agg.history().next().unwrap().clone(); 2];
        agg.requeue_unflushed(older);
        assert_eq!(agg.pending_len(), 3);
        assert_eq!(agg.dropped_unflushed(), 1);
    }

    #[test]
    fn mean_raw_over_history() {
        let mut agg = aggregator(4, 0.9);
        assert_eq!(agg.mean_raw(), None);
        agg.observe(1, 1.0, BTreeMap::new()).unwrap();
        agg.observe(2, 3.0, BTreeMap::new()).unwrap();
        assert_eq!(agg.mean_raw(), Some(2.0));
    }
}
