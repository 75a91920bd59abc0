//! Structured-record facade: schema management (`DbSchema`) and row
//! mutation/query (`DbEntry`, [`query`]), staging operations into a
//! [`crate::Batch`].
//!
//! Grounded on spec.md §4.2's DB vtable and `julea_backend::db`'s
//! `Document`/`Selector` shapes — this module is the thin per-call frontend
//! the batch engine's `exec_db_*` functions already know how to execute,
//! mirroring how `original_source/client/kv/jkv.c` keeps the facade itself
//! free of any connection or backend state.

use julea_backend::{Document, Selector};

use crate::batch::Batch;
use crate::operation::{Operation, Slot};

/// A named schema (table). Construction alone stages nothing.
pub struct DbSchema {
    name: String,
}

impl DbSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn create(&self, batch: &mut Batch, schema: Document) {
        batch.push(Operation::DbSchemaCreate { name: self.name.clone(), schema });
    }

    pub fn get(&self, batch: &mut Batch) -> Slot<Document> {
        let out = Slot::new();
        batch.push(Operation::DbSchemaGet { name: self.name.clone(), out: out.clone() });
        out
    }

    pub fn delete(&self, batch: &mut Batch) {
        batch.push(Operation::DbSchemaDelete { name: self.name.clone() });
    }
}

/// Row-level operations against a named schema.
pub struct DbEntry {
    name: String,
}

impl DbEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn insert(&self, batch: &mut Batch, row: Document) {
        batch.push(Operation::DbInsert { name: self.name.clone(), row });
    }

    pub fn update(&self, batch: &mut Batch, selector: Selector, row: Document) {
        batch.push(Operation::DbUpdate { name: self.name.clone(), selector, row });
    }

    pub fn delete(&self, batch: &mut Batch, selector: Selector) {
        batch.push(Operation::DbDelete { name: self.name.clone(), selector });
    }
}

/// Stages a query against `name`. `selector: None` matches every row.
pub fn query(batch: &mut Batch, name: impl Into<String>, selector: Option<Selector>) -> Slot<Vec<Document>> {
    let out = Slot::new();
    batch.push(Operation::DbQuery { name: name.into(), selector, out: out.clone() });
    out
}
