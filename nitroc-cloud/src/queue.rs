use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A timestamped queue entry
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    /// Milliseconds since the Unix epoch, assigned on insertion
    pub ts: u64,
    pub payload: T,
}

#[derive(Debug)]
struct Inner<T> {
    records: VecDeque<Record<T>>,
    last_ts: u64,
    dropped: u64,
}

/// Bounded FIFO of records waiting for upload
///
/// Once `capacity` records are queued, new records are dropped until the
/// consumer removes delivered entries. All methods take `&self` and can be
/// called from any thread, a single lock serializes access.
///
/// Consumers must snapshot a batch with [TransmitQueue::first_entries],
/// deliver it, and only then call [TransmitQueue::remove_first] with the
/// batch length. Records added while the batch is in flight are appended
/// after it and are never part of the removal.
#[derive(Debug)]
pub struct TransmitQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl<T: Clone> TransmitQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                last_ts: 0,
                dropped: 0,
            }),
        }
    }

    /// Append a new record stamped with the current time
    ///
    /// Returns `false` if the queue is full and the record was dropped.
    pub fn add(&self, payload: T) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if inner.records.len() >= self.capacity {
            inner.dropped += 1;
            warn!(
                capacity = self.capacity,
                dropped = inner.dropped,
                "transmit queue full, dropping new record"
            );
            return false;
        }

        // keep timestamps ordered even if the wall clock goes backwards
        let ts = now_ms().max(inner.last_ts);
        inner.last_ts = ts;
        inner.records.push_back(Record { ts, payload });
        true
    }

    pub fn num_entries(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.records.len()
    }

    /// Copy of the oldest `min(n, num_entries())` records
    pub fn first_entries(&self, n: usize) -> Vec<Record<T>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.records.iter().take(n).cloned().collect()
    }

    /// Drop the oldest `n` records
    ///
    /// Removes everything if fewer than `n` records are queued.
    pub fn remove_first(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let n = n.min(inner.records.len());
        inner.records.drain(..n);
    }

    /// Copy of all queued records
    pub fn all_entries(&self) -> Vec<Record<T>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.records.iter().cloned().collect()
    }

    /// Total number of records dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.dropped
    }
}
