//! Key-value facade: stages `JKV`-equivalent operations into a [`crate::Batch`].
//!
//! Grounded on `original_source/client/kv/jkv.c`'s `JKV` struct (namespace +
//! key + data-server index, no direct connection): `Kv` here carries the
//! same two strings and nothing else, leaving routing and execution to the
//! batch engine. `j_kv_put`/`j_kv_delete`/`j_kv_get` each build one
//! `JOperation` and append it to the caller's batch via `j_batch_add`; the
//! `put`/`delete`/`get` methods below do the same through
//! [`crate::Batch::push`].

use crate::batch::Batch;
use crate::operation::{Operation, Slot};

/// A single key inside a namespace. Cheap to construct; carries no
/// connection or backend state of its own.
pub struct Kv {
    namespace: String,
    key: String,
}

impl Kv {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), key: key.into() }
    }

    /// Stages a put. Last writer wins within a batch, same as two
    /// `j_kv_put` calls against the same key.
    pub fn put(&self, batch: &mut Batch, value: impl Into<Vec<u8>>) {
        batch.push(Operation::KvPut { namespace: self.namespace.clone(), key: self.key.clone(), value: value.into() });
    }

    pub fn delete(&self, batch: &mut Batch) {
        batch.push(Operation::KvDelete { namespace: self.namespace.clone(), key: self.key.clone() });
    }

    /// Stages a get. The returned slot is populated once `batch.execute()`
    /// (or the batch's self-execution on drop) has run; `None` means the
    /// key does not exist, not that the batch hasn't run yet — callers must
    /// not read the slot before execution completes.
    pub fn get(&self, batch: &mut Batch) -> Slot<Option<Vec<u8>>> {
        let out = Slot::new();
        batch.push(Operation::KvGet { namespace: self.namespace.clone(), key: self.key.clone(), out: out.clone() });
        out
    }
}

/// Lists every key in `namespace`. Not fused with other listings in the
/// same batch onto one wire message (spec.md §4.6's per-piece reasoning
/// applies equally here: unbounded result sizes aren't worth batching).
pub fn get_all(batch: &mut Batch, namespace: impl Into<String>) -> Slot<Vec<(String, Vec<u8>)>> {
    let out = Slot::new();
    batch.push(Operation::KvGetAll { namespace: namespace.into(), prefix: None, out: out.clone() });
    out
}

pub fn get_by_prefix(batch: &mut Batch, namespace: impl Into<String>, prefix: impl Into<String>) -> Slot<Vec<(String, Vec<u8>)>> {
    let out = Slot::new();
    batch.push(Operation::KvGetAll { namespace: namespace.into(), prefix: Some(prefix.into()), out: out.clone() });
    out
}
