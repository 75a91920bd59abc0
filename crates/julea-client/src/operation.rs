//! The deferred operation: a tagged union of per-call payloads plus a
//! grouping key, the same-kind fusion unit batches execute (spec.md §3/§4.1).
//!
//! `original_source/lib/core/jbatch.c`'s `JOperation` pairs an opaque
//! `gpointer data` blob with a `JOperationType` enum and an `exec_func`
//! dispatched by `type` in `j_batch_execute_same`. SPEC_FULL.md's redesign
//! note replaces
//! that `void* + function pointer` pair with a genuine sum type: each
//! variant below carries its own typed payload, [`Operation::fusion_key`]
//! stands in for the source's `(type, key)` pair, and the batch engine
//! matches on the variant identity to pick the group executor instead of
//! calling through a function pointer. [`Slot`] replaces the source's
//! caller-provided output pointer (`guint64* bytes_read`, `gint64*
//! modification_time`, ...): a cloneable cell the facade hands back to the
//! caller and the batch engine fills in during execution.

use std::sync::{Arc, Mutex};

use julea_backend::{Document, Selector};

/// A caller-visible slot for a result written during batch execution, the
/// idiomatic-Rust analog of the source's output pointers. Cheap to clone;
/// every clone observes the same write.
#[derive(Debug, Clone)]
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub(crate) fn set(&self, value: T) {
        *self.0.lock().unwrap() = Some(value);
    }

    /// Reads the result. `None` until the batch that holds the owning
    /// operation has executed.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.0.lock().unwrap().clone()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One deferred unit inside a batch. Each variant is one kind of call a
/// facade (`Kv`, `DistributedObject`, `DbSchema`/`DbEntry`) can make;
/// grouping and fusion key off [`Operation::fusion_key`], execution key off
/// the variant itself (spec.md §4.1's "same `exec_func` and the same
/// `key`").
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    KvPut { namespace: String, key: String, value: Vec<u8> },
    KvDelete { namespace: String, key: String },
    KvGet { namespace: String, key: String, out: Slot<Option<Vec<u8>>> },
    KvGetAll { namespace: String, prefix: Option<String>, out: Slot<Vec<(String, Vec<u8>)>> },

    ObjectCreate { namespace: String, path: String, server_index: u32 },
    ObjectDelete { namespace: String, path: String, server_index: u32 },
    ObjectWrite { namespace: String, path: String, data: Vec<u8>, offset: u64, server_index: u32, out: Slot<u64> },
    ObjectRead { namespace: String, path: String, length: u64, offset: u64, server_index: u32, out: Slot<(Vec<u8>, u64)> },
    ObjectStatus { namespace: String, path: String, server_index: u32, out: Slot<(u64, u64)> },
    ObjectSync { namespace: String, path: String, server_index: u32 },
    ObjectList { namespace: String, prefix: Option<String>, server_index: u32, out: Slot<Vec<String>> },

    DbSchemaCreate { name: String, schema: Document },
    DbSchemaGet { name: String, out: Slot<Document> },
    DbSchemaDelete { name: String },
    DbInsert { name: String, row: Document },
    DbUpdate { name: String, selector: Selector, row: Document },
    DbDelete { name: String, selector: Selector },
    DbQuery { name: String, selector: Option<Selector>, out: Slot<Vec<Document>> },
}

/// Discriminant identity used for fusion; two operations fuse only when
/// both this and [`Operation::fusion_key`] match (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    KvPut,
    KvDelete,
    KvGet,
    KvGetAll,
    ObjectCreate,
    ObjectDelete,
    ObjectWrite,
    ObjectRead,
    ObjectStatus,
    ObjectSync,
    ObjectList,
    DbSchemaCreate,
    DbSchemaGet,
    DbSchemaDelete,
    DbInsert,
    DbUpdate,
    DbDelete,
    DbQuery,
}

impl Operation {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Operation::KvPut { .. } => Kind::KvPut,
            Operation::KvDelete { .. } => Kind::KvDelete,
            Operation::KvGet { .. } => Kind::KvGet,
            Operation::KvGetAll { .. } => Kind::KvGetAll,
            Operation::ObjectCreate { .. } => Kind::ObjectCreate,
            Operation::ObjectDelete { .. } => Kind::ObjectDelete,
            Operation::ObjectWrite { .. } => Kind::ObjectWrite,
            Operation::ObjectRead { .. } => Kind::ObjectRead,
            Operation::ObjectStatus { .. } => Kind::ObjectStatus,
            Operation::ObjectSync { .. } => Kind::ObjectSync,
            Operation::ObjectList { .. } => Kind::ObjectList,
            Operation::DbSchemaCreate { .. } => Kind::DbSchemaCreate,
            Operation::DbSchemaGet { .. } => Kind::DbSchemaGet,
            Operation::DbSchemaDelete { .. } => Kind::DbSchemaDelete,
            Operation::DbInsert { .. } => Kind::DbInsert,
            Operation::DbUpdate { .. } => Kind::DbUpdate,
            Operation::DbDelete { .. } => Kind::DbDelete,
            Operation::DbQuery { .. } => Kind::DbQuery,
        }
    }

    /// The grouping token operations are fused on: the namespace for
    /// object/kv calls, the schema name for db calls — the same scoping a
    /// single message or a single backend batch call covers.
    pub(crate) fn fusion_key(&self) -> &str {
        match self {
            Operation::KvPut { namespace, .. }
            | Operation::KvDelete { namespace, .. }
            | Operation::KvGet { namespace, .. }
            | Operation::KvGetAll { namespace, .. }
            | Operation::ObjectCreate { namespace, .. }
            | Operation::ObjectDelete { namespace, .. }
            | Operation::ObjectWrite { namespace, .. }
            | Operation::ObjectRead { namespace, .. }
            | Operation::ObjectStatus { namespace, .. }
            | Operation::ObjectSync { namespace, .. }
            | Operation::ObjectList { namespace, .. } => namespace,

            Operation::DbSchemaCreate { name, .. }
            | Operation::DbSchemaGet { name, .. }
            | Operation::DbSchemaDelete { name, .. }
            | Operation::DbInsert { name, .. }
            | Operation::DbUpdate { name, .. }
            | Operation::DbDelete { name, .. }
            | Operation::DbQuery { name, .. } => name,
        }
    }

    /// Whether the operation-cache admission test (spec.md §4.4) may accept
    /// this operation: writes are cacheable, anything that must hand data
    /// back to the caller is not.
    pub(crate) fn can_cache(&self) -> bool {
        matches!(
            self,
            Operation::KvPut { .. }
                | Operation::KvDelete { .. }
                | Operation::ObjectCreate { .. }
                | Operation::ObjectDelete { .. }
                | Operation::ObjectWrite { .. }
                | Operation::ObjectSync { .. }
                | Operation::DbSchemaCreate { .. }
                | Operation::DbSchemaDelete { .. }
                | Operation::DbInsert { .. }
                | Operation::DbUpdate { .. }
                | Operation::DbDelete { .. }
        )
    }

    /// The physical server an object piece targets, as chosen by the
    /// distribution policy at operation-construction time (spec.md §4.6).
    /// `None` for KV/DB operations, which route by hashing the fusion key
    /// instead (see `wire::route_index`).
    pub(crate) fn server_index(&self) -> Option<u32> {
        match self {
            Operation::ObjectCreate { server_index, .. }
            | Operation::ObjectDelete { server_index, .. }
            | Operation::ObjectWrite { server_index, .. }
            | Operation::ObjectRead { server_index, .. }
            | Operation::ObjectStatus { server_index, .. }
            | Operation::ObjectSync { server_index, .. }
            | Operation::ObjectList { server_index, .. } => Some(*server_index),
            _ => None,
        }
    }

    /// Bytes the operation-cache arena must reserve to admit this write
    /// (spec.md §4.4's `required_bytes`).
    pub(crate) fn required_bytes(&self) -> u64 {
        match self {
            Operation::KvPut { value, .. } => value.len() as u64,
            Operation::ObjectWrite { data, .. } => data.len() as u64,
            Operation::DbInsert { row, .. } | Operation::DbUpdate { row, .. } => serde_json::to_vec(row).map(|b| b.len() as u64).unwrap_or(0),
            _ => 0,
        }
    }
}
