//! Per-(backend kind, server index) connection pool.
//!
//! Grounded on spec.md §4.3 ("Pool layout"/"Pop semantics"/"Push
//! semantics") and `original_source/lib/jconnection-pool.c`'s `JList`
//! FIFO-queue-plus-counter design: a non-blocking dequeue is tried first;
//! on miss, a slot is reserved with an increment-then-check (decrementing
//! on race loss) and a fresh connection dialed; if no slot is available the
//! caller waits on the queue. Push re-enqueues without closing — connections
//! are only closed when the pool itself is torn down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use julea_core::{BackendKind, ConnectionError, Configuration};

use crate::connection::Connection;

struct Inner {
    idle: Mutex<Vec<Connection>>,
    notify: Notify,
    counter: AtomicU32,
    max: u32,
    host: String,
    port: u16,
}

/// One pool per `(server index)` for a single backend kind; `Pools` below
/// indexes these per kind.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<Inner>,
}

impl ServerPool {
    fn new(host: String, port: u16, max: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::new()),
                notify: Notify::new(),
                counter: AtomicU32::new(0),
                max,
                host,
                port,
            }),
        }
    }

    /// Returns an idle connection, reserves a new slot and dials, or waits
    /// for a push — in that priority order (spec.md §4.3 "Pop semantics").
    pub async fn pop(&self, max_operation_size: u64) -> Result<Connection, ConnectionError> {
        loop {
            if let Some(conn) = self.inner.idle.lock().await.pop() {
                return Ok(conn);
            }

            if self.try_reserve() {
                return match Connection::connect((&self.inner.host, self.inner.port), max_operation_size).await {
                    Ok(conn) => Ok(conn),
                    Err(e) => {
                        self.inner.counter.fetch_sub(1, Ordering::AcqRel);
                        Err(ConnectionError::HandshakeFailed(format!("{}:{}", self.inner.host, self.inner.port), e.to_string()))
                    }
                };
            }

            self.inner.notify.notified().await;
        }
    }

    /// Increment-then-check; decrements and reports failure on race loss,
    /// so the counter invariant `counter <= max` always holds.
    fn try_reserve(&self) -> bool {
        let previous = self.inner.counter.fetch_add(1, Ordering::AcqRel);
        if previous < self.inner.max {
            true
        } else {
            self.inner.counter.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    /// Re-enqueues a connection for reuse without closing it.
    pub async fn push(&self, conn: Connection) {
        self.inner.idle.lock().await.push(conn);
        self.inner.notify.notify_one();
    }

    pub fn in_use_or_idle_count(&self) -> u32 {
        self.inner.counter.load(Ordering::Acquire)
    }
}

/// All pools for one backend kind, indexed by server position in
/// `Configuration`'s server list for that kind.
pub struct Pools {
    pools: Vec<ServerPool>,
}

impl Pools {
    pub fn for_kind(config: &Configuration, kind: BackendKind) -> Result<Self, ConnectionError> {
        let servers = config.servers(kind);
        if servers.is_empty() {
            return Err(ConnectionError::NoServers(kind.as_str()));
        }

        let pools = servers
            .iter()
            .map(|server| {
                let (host, port) = Configuration::server_addr(server);
                ServerPool::new(host, port, config.max_connections)
            })
            .collect();

        Ok(Self { pools })
    }

    pub fn get(&self, index: usize) -> Option<&ServerPool> {
        self.pools.get(index)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_reserve_respects_max() {
        let pool = ServerPool::new("localhost".to_string(), 0, 1);
        assert!(pool.try_reserve());
        assert!(!pool.try_reserve());
        assert_eq!(pool.in_use_or_idle_count(), 1);
    }
}
