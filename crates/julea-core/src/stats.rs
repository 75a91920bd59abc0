//! Per-thread statistics accumulation, folded into a process-wide aggregate
//! at session end (spec.md §2/§8).
//!
//! Grounded on `original_source`'s statistics counters (files
//! created/deleted, bytes read/written/sent/received, syncs), translated to
//! a thread-local accumulator plus a single mutex-guarded aggregate, the
//! Rust analog of "accumulated locally, folded under a guard at session
//! end" (spec.md §7's synchronization boundaries list). Counters are also
//! mirrored into the process `metrics` registry so `julead` can expose them
//! through a Prometheus exporter, the way the teacher declares `metrics` in
//! its workspace dependencies for the same purpose.

use std::sync::Mutex;

/// One snapshot of counters. `Add`-able so per-thread locals can be folded
/// into the aggregate with a single statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub files_created: u64,
    pub files_deleted: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub syncs: u64,
}

impl std::ops::AddAssign for Counters {
    fn add_assign(&mut self, rhs: Self) {
        self.files_created += rhs.files_created;
        self.files_deleted += rhs.files_deleted;
        self.bytes_read += rhs.bytes_read;
        self.bytes_written += rhs.bytes_written;
        self.bytes_sent += rhs.bytes_sent;
        self.bytes_received += rhs.bytes_received;
        self.syncs += rhs.syncs;
    }
}

/// Per-thread accumulator. Not synchronized; callers fold into
/// [`Statistics`] explicitly at session end (or whenever a batch completes,
/// for long-lived worker threads).
#[derive(Debug, Default)]
pub struct ThreadStatistics {
    pub local: Counters,
}

impl ThreadStatistics {
    pub fn add_files_created(&mut self, n: u64) {
        self.local.files_created += n;
    }

    pub fn add_files_deleted(&mut self, n: u64) {
        self.local.files_deleted += n;
    }

    pub fn add_bytes_read(&mut self, n: u64) {
        self.local.bytes_read += n;
    }

    pub fn add_bytes_written(&mut self, n: u64) {
        self.local.bytes_written += n;
    }

    pub fn add_bytes_sent(&mut self, n: u64) {
        self.local.bytes_sent += n;
    }

    pub fn add_bytes_received(&mut self, n: u64) {
        self.local.bytes_received += n;
    }

    pub fn add_sync(&mut self) {
        self.local.syncs += 1;
    }
}

/// Process-wide aggregate, guarded by a single mutex (spec.md §7: "one
/// global counter set guarded by a mutex, updated in bulk at worker/session
/// end").
#[derive(Debug, Default)]
pub struct Statistics {
    aggregate: Mutex<Counters>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a thread-local accumulator into the aggregate and mirrors the
    /// delta into the `metrics` registry.
    pub fn merge(&self, local: &ThreadStatistics) {
        let mut guard = self.aggregate.lock().unwrap();
        *guard += local.local;

        metrics::counter!("julea_files_created_total").increment(local.local.files_created);
        metrics::counter!("julea_files_deleted_total").increment(local.local.files_deleted);
        metrics::counter!("julea_bytes_read_total").increment(local.local.bytes_read);
        metrics::counter!("julea_bytes_written_total").increment(local.local.bytes_written);
        metrics::counter!("julea_bytes_sent_total").increment(local.local.bytes_sent);
        metrics::counter!("julea_bytes_received_total").increment(local.local.bytes_received);
        metrics::counter!("julea_syncs_total").increment(local.local.syncs);
    }

    pub fn snapshot(&self) -> Counters {
        *self.aggregate.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_folds_into_aggregate() {
        let stats = Statistics::new();

        let mut t1 = ThreadStatistics::default();
        t1.add_bytes_written(100);
        t1.add_files_created(1);
        stats.merge(&t1);

        let mut t2 = ThreadStatistics::default();
        t2.add_bytes_written(50);
        stats.merge(&t2);

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_written, 150);
        assert_eq!(snap.files_created, 1);
    }
}
