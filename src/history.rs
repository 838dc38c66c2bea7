//! Fetch history.
//!
//! A [`FetchRecord`] is the immutable outcome of one dispatched fetch. Each
//! target owns a [`HistoryLog`], an append-only sequence of records guarded by
//! its own lock, so concurrent fetch completions never contend on the
//! registry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Decimal places kept for [`FetchRecord::created_at`].
pub const CREATED_AT_PRECISION: i32 = 5;

/// Decimal places kept for [`FetchRecord::duration`].
pub const DURATION_PRECISION: i32 = 3;

/// Round `value` to `precision` decimal places.
pub fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

/// Seconds since the Unix epoch, with sub-second precision.
fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

/// Outcome of a single fetch attempt.
///
/// Fields are fixed at construction; the record exposes read accessors only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRecord {
    response: Option<String>,
    duration: f64,
    created_at: f64,
}

impl FetchRecord {
    /// Build a record for an attempt dispatched at `dispatched_at` that took
    /// `elapsed` to complete.
    ///
    /// `response` is `None` when the attempt failed (connect, timeout or body
    /// read error).
    pub fn new(dispatched_at: DateTime<Utc>, elapsed: Duration, response: Option<String>) -> Self {
        Self {
            response,
            duration: round_to(elapsed.as_secs_f64(), DURATION_PRECISION),
            created_at: round_to(epoch_seconds(dispatched_at), CREATED_AT_PRECISION),
        }
    }

    /// Response body, if the attempt completed.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Seconds from dispatch to completion, rounded to 3 decimals.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Unix time (seconds) of dispatch, rounded to 5 decimals.
    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Whether the attempt produced a response body.
    pub fn is_success(&self) -> bool {
        self.response.is_some()
    }
}

/// Retention policy applied on every append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep every record for the lifetime of the target.
    #[default]
    Unbounded,
    /// Keep at most this many records, evicting the oldest first.
    MaxRecords(usize),
}

impl Retention {
    /// Policy for an optional record cap (`None` means unbounded).
    pub fn from_max_records(max_records: Option<usize>) -> Self {
        max_records.map_or(Self::Unbounded, Self::MaxRecords)
    }

    fn enforce(&self, records: &mut VecDeque<FetchRecord>) {
        if let Self::MaxRecords(max) = *self {
            while records.len() > max {
                records.pop_front();
            }
        }
    }
}

/// Shared handle to one target's append-only fetch history.
///
/// Cloning the handle shares the underlying log: the worker hands a clone to
/// every fetch it dispatches, and each completion appends through it.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    records: Arc<Mutex<VecDeque<FetchRecord>>>,
    retention: Retention,
}

impl HistoryLog {
    /// Create an empty log with the given retention policy.
    pub fn new(retention: Retention) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            retention,
        }
    }

    /// Create a log pre-populated with `records`.
    pub fn from_records(records: impl IntoIterator<Item = FetchRecord>, retention: Retention) -> Self {
        let mut records: VecDeque<_> = records.into_iter().collect();
        retention.enforce(&mut records);
        Self {
            records: Arc::new(Mutex::new(records)),
            retention,
        }
    }

    /// Retention policy of this log.
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Append a record at the end of the log.
    pub fn append(&self, record: FetchRecord) {
        let mut records = self.lock();
        records.push_back(record);
        self.retention.enforce(&mut records);
    }

    /// Independent copy of the current records, oldest first.
    pub fn snapshot(&self) -> Vec<FetchRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Detached copy of this log: same records and policy, separate storage.
    ///
    /// Appends made through the original handle after forking are not
    /// visible in the fork.
    pub fn fork(&self) -> Self {
        Self::from_records(self.snapshot(), self.retention)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FetchRecord>> {
        // Appends cannot leave the deque half-written, so a poisoned lock is still usable.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
