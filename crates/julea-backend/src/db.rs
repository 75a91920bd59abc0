//! Structured-record (DB) backend vtable, selector tree, and an in-memory
//! reference driver.
//!
//! Grounded on spec.md §4.2's DB vtable and selector shape: a schema is a
//! document of `{column: type_tag, ..., _indexes: [...]}`, rows are
//! documents, and a selector is a tree of `_mode` (AND/OR) nodes with leaf
//! `{_name, _operator, _value}` predicates. `original_source/include/core/
//! jerror.h`'s `JULEA_BACKEND_ERROR_ITERATOR_NO_MORE_ELEMENTS` is the model
//! for [`BackendError::IteratorExhausted`] as the distinct "end of
//! iteration" signal `iterate()` returns instead of an `Option`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use julea_core::{BackendError, Safety};
use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMode {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A selector tree: either a leaf comparing one field, or a group combining
/// child selectors with AND/OR (spec.md §4.2's selector shape).
#[derive(Debug, Clone)]
pub enum Selector {
    Leaf { name: String, operator: Operator, value: Value },
    Group { mode: SelectorMode, children: Vec<Selector> },
}

impl Selector {
    pub fn matches(&self, row: &Document) -> bool {
        match self {
            Selector::Leaf { name, operator, value } => {
                let Some(field) = row.get(name) else {
                    return false;
                };
                compare(field, *operator, value)
            }
            Selector::Group { mode, children } => match mode {
                SelectorMode::And => children.iter().all(|c| c.matches(row)),
                SelectorMode::Or => children.iter().any(|c| c.matches(row)),
            },
        }
    }
}

fn compare(field: &Value, operator: Operator, value: &Value) -> bool {
    let ordering = match (field, value) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match operator {
        Operator::Eq => field == value,
        Operator::Ne => field != value,
        Operator::Lt => ordering == Some(std::cmp::Ordering::Less),
        Operator::Le => matches!(ordering, Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)),
        Operator::Gt => ordering == Some(std::cmp::Ordering::Greater),
        Operator::Ge => matches!(ordering, Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)),
    }
}

#[derive(Debug, Clone)]
enum DbOp {
    SchemaCreate { name: String, schema: Document },
    SchemaDelete { name: String },
    Insert { name: String },
    Update { name: String, selector: Selector },
    Delete { name: String, selector: Selector },
}

#[derive(Debug, Clone)]
enum DbOpValue {
    Insert(Document),
    Update(Document),
}

/// Staged schema/row mutations, applied together on `batch_execute`.
pub struct DbBatch {
    safety: Safety,
    ops: Vec<(DbOp, Option<DbOpValue>)>,
}

impl DbBatch {
    pub fn schema_create(&mut self, name: &str, schema: Document) {
        self.ops.push((DbOp::SchemaCreate { name: name.to_string(), schema }, None));
    }

    pub fn schema_delete(&mut self, name: &str) {
        self.ops.push((DbOp::SchemaDelete { name: name.to_string() }, None));
    }

    pub fn insert(&mut self, name: &str, row: Document) {
        self.ops.push((DbOp::Insert { name: name.to_string() }, Some(DbOpValue::Insert(row))));
    }

    pub fn update(&mut self, name: &str, selector: Selector, row: Document) {
        self.ops.push((DbOp::Update { name: name.to_string(), selector }, Some(DbOpValue::Update(row))));
    }

    pub fn delete(&mut self, name: &str, selector: Selector) {
        self.ops.push((DbOp::Delete { name: name.to_string(), selector }, None));
    }
}

struct Schema {
    columns: Document,
    rows: Vec<Document>,
}

pub trait DbBackend: Send + Sync {
    fn batch_start(&self, safety: Safety) -> DbBatch;
    fn batch_execute(&self, batch: DbBatch) -> Result<(), BackendError>;
    fn schema_get(&self, name: &str) -> Result<Document, BackendError>;
    fn query(&self, name: &str, selector: Option<&Selector>) -> Result<QueryIterator, BackendError>;
}

/// Query results as an iterator that signals end-of-iteration with
/// [`BackendError::IteratorExhausted`], mirroring the vtable contract
/// rather than returning `Option` (spec.md §4.2).
pub struct QueryIterator {
    rows: std::vec::IntoIter<Document>,
}

impl QueryIterator {
    pub fn next_row(&mut self) -> Result<Document, BackendError> {
        self.rows.next().ok_or(BackendError::IteratorExhausted)
    }
}

#[derive(Default)]
pub struct MemoryDbBackend {
    schemas: Mutex<BTreeMap<String, Schema>>,
}

impl MemoryDbBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DbBackend for MemoryDbBackend {
    fn batch_start(&self, safety: Safety) -> DbBatch {
        DbBatch { safety, ops: Vec::new() }
    }

    fn batch_execute(&self, batch: DbBatch) -> Result<(), BackendError> {
        let mut schemas = self.schemas.lock().unwrap();

        for (op, value) in batch.ops {
            match (op, value) {
                (DbOp::SchemaCreate { name, schema }, None) => {
                    schemas.insert(name, Schema { columns: schema, rows: Vec::new() });
                }
                (DbOp::SchemaDelete { name }, None) => {
                    schemas.remove(&name);
                }
                (DbOp::Insert { name, .. }, Some(DbOpValue::Insert(row))) => {
                    let schema = schemas.get_mut(&name).ok_or_else(|| BackendError::SchemaNotFound(name.clone()))?;
                    schema.rows.push(row);
                }
                (DbOp::Update { name, selector }, Some(DbOpValue::Update(patch))) => {
                    let schema = schemas.get_mut(&name).ok_or_else(|| BackendError::SchemaNotFound(name.clone()))?;
                    for row in schema.rows.iter_mut().filter(|r| selector.matches(r)) {
                        for (k, v) in &patch {
                            row.insert(k.clone(), v.clone());
                        }
                    }
                }
                (DbOp::Delete { name, selector }, None) => {
                    let schema = schemas.get_mut(&name).ok_or_else(|| BackendError::SchemaNotFound(name.clone()))?;
                    schema.rows.retain(|r| !selector.matches(r));
                }
                _ => unreachable!("db op staged with mismatched value"),
            }
        }

        Ok(())
    }

    fn schema_get(&self, name: &str) -> Result<Document, BackendError> {
        let schemas = self.schemas.lock().unwrap();
        schemas.get(name).map(|s| s.columns.clone()).ok_or_else(|| BackendError::SchemaNotFound(name.to_string()))
    }

    fn query(&self, name: &str, selector: Option<&Selector>) -> Result<QueryIterator, BackendError> {
        let schemas = self.schemas.lock().unwrap();
        let schema = schemas.get(name).ok_or_else(|| BackendError::SchemaNotFound(name.to_string()))?;

        let rows: Vec<Document> = match selector {
            Some(sel) => schema.rows.iter().filter(|r| sel.matches(r)).cloned().collect(),
            None => schema.rows.clone(),
        };

        Ok(QueryIterator { rows: rows.into_iter() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn insert_then_query_round_trips() {
        let backend = MemoryDbBackend::new();

        let mut batch = backend.batch_start(Safety::Network);
        batch.schema_create("users", doc(&[("name", json!("string")), ("age", json!("int64"))]));
        batch.insert("users", doc(&[("name", json!("alice")), ("age", json!(30))]));
        batch.insert("users", doc(&[("name", json!("bob")), ("age", json!(25))]));
        backend.batch_execute(batch).unwrap();

        let mut iter = backend.query("users", None).unwrap();
        let mut names = Vec::new();
        loop {
            match iter.next_row() {
                Ok(row) => names.push(row["name"].as_str().unwrap().to_string()),
                Err(BackendError::IteratorExhausted) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn selector_ge_filters_rows() {
        let backend = MemoryDbBackend::new();
        let mut batch = backend.batch_start(Safety::Network);
        batch.schema_create("users", Document::new());
        batch.insert("users", doc(&[("age", json!(30))]));
        batch.insert("users", doc(&[("age", json!(15))]));
        backend.batch_execute(batch).unwrap();

        let selector = Selector::Leaf { name: "age".to_string(), operator: Operator::Ge, value: json!(18) };
        let mut iter = backend.query("users", Some(&selector)).unwrap();
        assert_eq!(iter.next_row().unwrap()["age"], json!(30));
        assert!(matches!(iter.next_row(), Err(BackendError::IteratorExhausted)));
    }

    #[test]
    fn update_applies_only_to_matching_rows() {
        let backend = MemoryDbBackend::new();
        let mut batch = backend.batch_start(Safety::Network);
        batch.schema_create("users", Document::new());
        batch.insert("users", doc(&[("name", json!("alice")), ("active", json!(true))]));
        batch.insert("users", doc(&[("name", json!("bob")), ("active", json!(true))]));
        backend.batch_execute(batch).unwrap();

        let mut update_batch = backend.batch_start(Safety::Network);
        let selector = Selector::Leaf { name: "name".to_string(), operator: Operator::Eq, value: json!("bob") };
        update_batch.update("users", selector, doc(&[("active", json!(false))]));
        backend.batch_execute(update_batch).unwrap();

        let mut iter = backend.query("users", None).unwrap();
        let mut seen = Vec::new();
        while let Ok(row) = iter.next_row() {
            seen.push((row["name"].as_str().unwrap().to_string(), row["active"].as_bool().unwrap()));
        }
        seen.sort();
        assert_eq!(seen, vec![("alice".to_string(), true), ("bob".to_string(), false)]);
    }

    #[test]
    fn schema_not_found_is_reported() {
        let backend = MemoryDbBackend::new();
        assert!(backend.schema_get("missing").is_err());
    }
}
