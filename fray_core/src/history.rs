use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// One transmitted fuzz sample, as recorded by the mutation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    /// Monotonically increasing per-transmitter sequence number.
    pub sequence: u64,
    /// Hex encoding of the serialized wire bytes.
    pub hex: String,
}

/// What kind of fault the health monitor observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// A fatal-indicator line surfaced in the device's fault log.
    FatalError,
    /// A resource reading crossed the baseline spike threshold.
    ResourcePressure,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::FatalError => write!(f, "FatalError"),
            AnomalyKind::ResourcePressure => write!(f, "ResourcePressure"),
        }
    }
}

/// One observed device fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub description: String,
}

#[derive(Debug)]
struct Ring<T> {
    entries: VecDeque<T>,
    capacity: usize,
    /// How many records have been evicted; `evicted + entries.len()` is the
    /// monotonic count of records ever appended.
    evicted: u64,
}

/// A bounded, append-only record history shared between exactly one writer
/// and any number of readers.
///
/// Capacity is fixed at construction; pushing at capacity evicts the oldest
/// entry (FIFO). The handle is a cheap `Clone`; interior state sits behind a
/// mutex held only for the duration of a push or a snapshot copy.
///
/// Writer discipline: each history has a single designated writer (the
/// mutation engine for packets, the health monitor for anomalies). Readers
/// only take snapshots; nothing ever mutates an entry in place.
///
/// Records are addressed by *absolute index* — position in the append order
/// since construction — so a reader cursor stays exactly-once correct even
/// after old entries have been evicted.
#[derive(Debug, Clone)]
pub struct History<T> {
    inner: Arc<Mutex<Ring<T>>>,
}

impl<T: Clone> History<T> {
    /// Creates a history holding at most `capacity` records (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                evicted: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring<T>> {
        // A poisoned lock only means a writer panicked mid-push; the ring
        // itself is still structurally sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a record, evicting the oldest entry if at capacity.
    pub fn push(&self, record: T) {
        let mut ring = self.lock();
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
            ring.evicted += 1;
        }
        ring.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Monotonic count of records ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        let ring = self.lock();
        ring.evicted + ring.entries.len() as u64
    }

    /// A read-only copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().entries.iter().cloned().collect()
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let ring = self.lock();
        let skip = ring.entries.len().saturating_sub(n);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// Records with absolute index `>= cursor`, plus the new cursor value
    /// (the current total appended count).
    ///
    /// Entries evicted past the cursor are silently gone — the consumer
    /// sees at most the ring's capacity of backlog — but every record is
    /// returned at most once across successive calls.
    pub fn snapshot_since(&self, cursor: u64) -> (Vec<T>, u64) {
        let ring = self.lock();
        let next_cursor = ring.evicted + ring.entries.len() as u64;
        let skip = cursor.saturating_sub(ring.evicted) as usize;
        let fresh = ring.entries.iter().skip(skip).cloned().collect();
        (fresh, next_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_in_fifo_order() {
        let history: History<u32> = History::with_capacity(8);
        for value in 0..5 {
            history.push(value);
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.snapshot(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn capacity_is_never_exceeded_and_eviction_is_oldest_first() {
        let history: History<u32> = History::with_capacity(3);
        for value in 0..10 {
            history.push(value);
            assert!(history.len() <= 3);
        }
        assert_eq!(history.snapshot(), vec![7, 8, 9]);
        assert_eq!(history.total_appended(), 10);
    }

    #[test]
    fn recent_returns_newest_entries_oldest_first() {
        let history: History<u32> = History::with_capacity(10);
        for value in 0..6 {
            history.push(value);
        }
        assert_eq!(history.recent(3), vec![3, 4, 5]);
        assert_eq!(history.recent(100), vec![0, 1, 2, 3, 4, 5]);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn snapshot_since_returns_each_record_exactly_once() {
        let history: History<u32> = History::with_capacity(10);
        history.push(1);
        history.push(2);

        let (first, cursor) = history.snapshot_since(0);
        assert_eq!(first, vec![1, 2]);
        assert_eq!(cursor, 2);

        // No new records: nothing to return, cursor unchanged.
        let (empty, cursor) = history.snapshot_since(cursor);
        assert!(empty.is_empty());
        assert_eq!(cursor, 2);

        history.push(3);
        let (fresh, cursor) = history.snapshot_since(cursor);
        assert_eq!(fresh, vec![3]);
        assert_eq!(cursor, 3);
    }

    #[test]
    fn snapshot_since_survives_eviction_without_replays() {
        let history: History<u32> = History::with_capacity(2);
        history.push(0);
        history.push(1);
        let (_, cursor) = history.snapshot_since(0);

        // Push enough to evict everything the cursor has seen.
        for value in 2..6 {
            history.push(value);
        }
        let (fresh, cursor) = history.snapshot_since(cursor);
        // Records 2 and 3 were evicted before this read; 4 and 5 remain,
        // and nothing already consumed comes back.
        assert_eq!(fresh, vec![4, 5]);
        assert_eq!(cursor, 6);
    }

    #[test]
    fn clone_handles_share_the_same_ring() {
        let writer: History<u32> = History::with_capacity(4);
        let reader = writer.clone();
        writer.push(42);
        assert_eq!(reader.snapshot(), vec![42]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let history: History<u32> = History::with_capacity(0);
        history.push(1);
        history.push(2);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.snapshot(), vec![2]);
    }
}
