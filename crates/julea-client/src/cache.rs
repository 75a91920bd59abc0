//! The eventual-consistency operation cache: a process-wide byte budget
//! standing in for the ~50 MiB arena, a worker task draining a queue, and an
//! admission test gating what can be cached (spec.md §4.4).
//!
//! Grounded on spec.md §4.4 verbatim: "a single process-wide arena of ~50
//! MiB backed by a worker thread and an async queue." The original's arena
//! is a real slab `j_operation_cache_copy` memcpys write payloads into; here
//! ownership already moves the payload `Vec<u8>` into the queued batch (no
//! separate copy needed in safe Rust), so the budget tracks *bytes
//! reserved* rather than a literal memory region — the same admission
//! accounting, translated to match how Rust's ownership already satisfies
//! "the caller may free its buffers immediately."

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

const ARENA_CAPACITY_BYTES: i64 = 50 * 1024 * 1024;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type QueuedJob = Box<dyn FnOnce() -> BoxFuture + Send>;

pub(crate) struct OperationCache {
    budget: Arc<AtomicI64>,
    inflight: Arc<AtomicUsize>,
    notify: Arc<Notify>,
    sender: mpsc::UnboundedSender<QueuedJob>,
}

impl OperationCache {
    /// Spawns the worker task onto `handle` rather than relying on an
    /// ambient runtime context, since `Client::new` constructs this before
    /// any async context is entered.
    pub(crate) fn new(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedJob>();
        let inflight = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());

        let worker_inflight = inflight.clone();
        let worker_notify = notify.clone();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
                worker_inflight.fetch_sub(1, Ordering::AcqRel);
                worker_notify.notify_waiters();
            }
        });

        Self {
            budget: Arc::new(AtomicI64::new(ARENA_CAPACITY_BYTES)),
            inflight,
            notify,
            sender,
        }
    }

    /// Admission test (spec.md §4.4): reserves `required_bytes` from the
    /// arena budget if it fits, returning `false` (reject) otherwise. On
    /// acceptance, `run` is queued for the worker and this returns
    /// immediately; the reserved bytes are credited back to the budget once
    /// the worker finishes running it, the FIFO-arena-slab equivalent of
    /// "release the arena slab" on completion.
    pub(crate) fn try_enqueue<F>(&self, required_bytes: u64, run: F) -> bool
    where
        F: FnOnce() -> BoxFuture + Send + 'static,
    {
        if !self.reserve(required_bytes as i64) {
            return false;
        }

        self.inflight.fetch_add(1, Ordering::AcqRel);

        let budget = self.budget.clone();
        let job: QueuedJob = Box::new(move || {
            let fut = run();
            Box::pin(async move {
                fut.await;
                budget.fetch_add(required_bytes as i64, Ordering::AcqRel);
            })
        });

        if self.sender.send(job).is_err() {
            // Worker task gone (runtime shutting down); release what we
            // reserved and report as not cached so the caller falls back
            // to synchronous execution.
            self.budget.fetch_add(required_bytes as i64, Ordering::AcqRel);
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        true
    }

    fn reserve(&self, bytes: i64) -> bool {
        loop {
            let current = self.budget.load(Ordering::Acquire);
            if bytes > current {
                return false;
            }
            if self
                .budget
                .compare_exchange(current, current - bytes, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Blocks until the queue has fully drained (spec.md §4.4's flush
    /// semantics): implicit on every IMMEDIATE `execute()`, on any frontend
    /// read, and on cache-subsystem teardown.
    pub(crate) async fn flush(&self) {
        loop {
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }

            // Register interest before the second check: `notify_waiters`
            // only wakes futures already polled at the time it's called, so
            // checking-then-awaiting without first constructing `notified`
            // could miss a completion that lands between the two.
            let notified = self.notify.notified();
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn rejects_when_budget_exceeded() {
        let cache = OperationCache::new(&tokio::runtime::Handle::current());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let accepted = cache.try_enqueue(ARENA_CAPACITY_BYTES as u64 + 1, move || {
            Box::pin(async move {
                ran_clone.store(true, Ordering::Release);
            })
        });

        assert!(!accepted);
        assert!(!ran.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn runs_queued_job_and_releases_budget_on_flush() {
        let cache = OperationCache::new(&tokio::runtime::Handle::current());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let accepted = cache.try_enqueue(1024, move || {
            Box::pin(async move {
                ran_clone.store(true, Ordering::Release);
            })
        });
        assert!(accepted);

        cache.flush().await;
        assert!(ran.load(Ordering::Acquire));
        assert_eq!(cache.budget.load(Ordering::Acquire), ARENA_CAPACITY_BYTES);
    }
}
