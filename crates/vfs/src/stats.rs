//! Process-wide workload counters.
//!
//! Four monotonic counters cover the session: logical read/write
//! transaction counts and requested read/write byte totals. Updates
//! come from whatever thread the kernel dispatches on, so the fields
//! are atomics; Relaxed ordering suffices because each counter is an
//! independent monotonic sum with no ordering dependency on the others.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared workload counters for one mount session.
///
/// Created zero-initialized at mount; summarized and discarded at
/// unmount. Counters never decrease within a session.
#[derive(Debug, Default)]
pub struct WorkloadStats {
    read_ops: AtomicU64,
    write_ops: AtomicU64,
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
}

impl WorkloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one logical read transaction.
    pub fn count_read_op(&self) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one logical write transaction.
    pub fn count_write_op(&self) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Add requested bytes for one read fragment.
    ///
    /// # Arguments
    /// * `bytes` - Requested transfer size of the fragment
    pub fn add_read_bytes(&self, bytes: u64) {
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add requested bytes for one write fragment.
    ///
    /// # Arguments
    /// * `bytes` - Requested transfer size of the fragment
    pub fn add_write_bytes(&self, bytes: u64) {
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take an immutable copy of all four counters.
    pub fn snapshot(&self) -> WorkloadSnapshot {
        WorkloadSnapshot {
            read_ops: self.read_ops.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Immutable counter snapshot with derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    /// Logical read transactions observed.
    pub read_ops: u64,
    /// Logical write transactions observed.
    pub write_ops: u64,
    /// Requested read bytes across all fragments.
    pub read_bytes: u64,
    /// Requested write bytes across all fragments.
    pub write_bytes: u64,
}

impl WorkloadSnapshot {
    /// Total logical transactions, reads plus writes.
    pub fn total_ops(&self) -> u64 {
        self.read_ops + self.write_ops
    }

    /// Total requested bytes, reads plus writes.
    pub fn total_bytes(&self) -> u64 {
        self.read_bytes + self.write_bytes
    }

    /// Average requested size of a logical read.
    ///
    /// # Returns
    /// `None` when no read transaction was observed.
    pub fn average_read_size(&self) -> Option<f64> {
        if self.read_ops == 0 {
            None
        } else {
            Some(self.read_bytes as f64 / self.read_ops as f64)
        }
    }

    /// Average requested size of a logical write.
    ///
    /// # Returns
    /// `None` when no write transaction was observed.
    pub fn average_write_size(&self) -> Option<f64> {
        if self.write_ops == 0 {
            None
        } else {
            Some(self.write_bytes as f64 / self.write_ops as f64)
        }
    }

    /// Share of read bytes in the total byte volume, in percent.
    ///
    /// # Returns
    /// `None` when no bytes were transferred at all.
    pub fn read_percentage(&self) -> Option<f64> {
        let total: u64 = self.total_bytes();
        if total == 0 {
            None
        } else {
            Some(self.read_bytes as f64 / total as f64 * 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let snap: WorkloadSnapshot = WorkloadStats::new().snapshot();
        assert_eq!(snap.total_ops(), 0);
        assert_eq!(snap.total_bytes(), 0);
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let stats: WorkloadStats = WorkloadStats::new();
        stats.count_read_op();
        stats.add_read_bytes(100);
        stats.count_write_op();
        stats.add_write_bytes(50);

        let snap: WorkloadSnapshot = stats.snapshot();
        assert_eq!(snap.read_ops, 1);
        assert_eq!(snap.write_ops, 1);
        assert_eq!(snap.read_bytes, 100);
        assert_eq!(snap.write_bytes, 50);

        // Further updates do not retroactively change the snapshot.
        stats.add_read_bytes(1);
        assert_eq!(snap.read_bytes, 100);
    }

    #[test]
    fn test_derived_metrics() {
        let stats: WorkloadStats = WorkloadStats::new();
        for _ in 0..3 {
            stats.count_read_op();
        }
        stats.add_read_bytes(300);
        stats.count_write_op();
        stats.add_write_bytes(100);

        let snap: WorkloadSnapshot = stats.snapshot();
        assert_eq!(snap.average_read_size(), Some(100.0));
        assert_eq!(snap.average_write_size(), Some(100.0));
        assert_eq!(snap.read_percentage(), Some(75.0));
    }

    #[test]
    fn test_zero_divisor_rates_are_none() {
        let snap: WorkloadSnapshot = WorkloadStats::new().snapshot();
        assert_eq!(snap.average_read_size(), None);
        assert_eq!(snap.average_write_size(), None);
        assert_eq!(snap.read_percentage(), None);
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        const THREADS: u64 = 8;
        const INCREMENTS: u64 = 10_000;

        let stats: Arc<WorkloadStats> = Arc::new(WorkloadStats::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stats: Arc<WorkloadStats> = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..INCREMENTS {
                        stats.count_read_op();
                        stats.add_read_bytes(3);
                        stats.add_write_bytes(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap: WorkloadSnapshot = stats.snapshot();
        assert_eq!(snap.read_ops, THREADS * INCREMENTS);
        assert_eq!(snap.read_bytes, THREADS * INCREMENTS * 3);
        assert_eq!(snap.write_bytes, THREADS * INCREMENTS);
    }
}
