//! Latency Tracker Module
//!
//! Maintains, per correlation id, the time of the last observed event and a
//! running average of the intervals between consecutive updates. The average
//! is a cumulative mean over the whole series, not a windowed one.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error returned when an update references a correlation id the tracker has
/// never seen on the send path.
#[derive(Debug, Error)]
#[error("No latency record for correlation id '{0}'")]
pub struct CorrelationError(pub String);

/// Per-correlation-id timing state.
#[derive(Debug, Clone)]
struct ResponseRecord {
    last_seen: Instant,
    average_secs: f64,
    samples: u64,
}

/// One update's measurement, returned for the caller to report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateSample {
    pub interval: Duration,
    pub average: Duration,
    pub samples: u64,
}

/// Tracks inter-update latency per subscription.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    records: HashMap<String, ResponseRecord>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the request with `correlation_id` was (re)sent at `now`.
    ///
    /// A new id starts with an empty history. An existing id keeps its
    /// statistics and only has its last-seen timestamp refreshed, so a
    /// resubscription after a reconnect continues the same series.
    pub fn record_sent(&mut self, correlation_id: &str, now: Instant) {
        self.records
            .entry(correlation_id.to_string())
            .and_modify(|record| record.last_seen = now)
            .or_insert(ResponseRecord {
                last_seen: now,
                average_secs: 0.0,
                samples: 0,
            });
    }

    /// Fold one inbound update at `now` into the record for `correlation_id`.
    ///
    /// The interval since the previous event joins the cumulative mean:
    /// `avg' = (avg * n + interval) / (n + 1)`. Fails without touching any
    /// state when the id is unknown.
    pub fn record_update(
        &mut self,
        correlation_id: &str,
        now: Instant,
    ) -> Result<UpdateSample, CorrelationError> {
        let record = self
            .records
            .get_mut(correlation_id)
            .ok_or_else(|| CorrelationError(correlation_id.to_string()))?;

        let interval = now.saturating_duration_since(record.last_seen);
        let n = record.samples as f64;
        record.average_secs = (record.average_secs * n + interval.as_secs_f64()) / (n + 1.0);
        record.samples += 1;
        record.last_seen = now;

        Ok(UpdateSample {
            interval,
            average: Duration::from_secs_f64(record.average_secs),
            samples: record.samples,
        })
    }

    /// Whether `correlation_id` has a record.
    pub fn has_record(&self, correlation_id: &str) -> bool {
        self.records.contains_key(correlation_id)
    }

    /// Sample count for `correlation_id`, zero if unknown.
    pub fn samples(&self, correlation_id: &str) -> u64 {
        self.records.get(correlation_id).map_or(0, |r| r.samples)
    }

    /// Number of tracked correlation ids.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records. Used when a reconnect starts a fresh measurement
    /// series under new correlation ids.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
