//! Error taxonomy shared by backends, the wire layer and the client.
//!
//! Grounded on `original_source/include/core/jerror.h`'s
//! `JuleaBackendError`/`JuleaFrontendError` enums (a flat `GQuark`-tagged
//! error domain with a format string per variant), translated into a
//! `thiserror` enum the way the retrieval pack's backend drivers
//! (`kvdb-rocksdb::error::Error`) each expose a single typed error rather
//! than a string domain. DB-selector and schema variants come straight from
//! that header; the object/kv variants are this crate's analog for the
//! (much shorter) object and key-value backend vtables.

use thiserror::Error;

/// Errors a backend driver (object, key-value or database) can report back
/// across the wire or to an in-process caller.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("batch not set")]
    BatchNull,

    #[error("name not set")]
    NameNull,

    #[error("namespace not set")]
    NamespaceNull,

    #[error("no such object: {namespace}/{name}")]
    ObjectNotFound { namespace: String, name: String },

    #[error("no such key: {namespace}/{key}")]
    KeyNotFound { namespace: String, key: String },

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("schema is empty")]
    SchemaEmpty,

    #[error("schema not set")]
    SchemaNull,

    #[error("selector not set")]
    SelectorNull,

    #[error("selector is empty")]
    SelectorEmpty,

    #[error("selector must not contain more than {0} variables")]
    SelectorTooComplex(usize),

    #[error("db operator invalid: {0:?}")]
    OperatorInvalid(String),

    #[error("db comparator invalid: {0:?}")]
    ComparatorInvalid(String),

    #[error("db invalid type '{0}'")]
    DbTypeInvalid(i32),

    #[error("variable '{0}' not defined in schema")]
    VariableNotFound(String),

    #[error("variable already set")]
    VariableAlreadySet,

    #[error("no variable set to a value other than null")]
    NoVariableSet,

    #[error("metadata not set")]
    MetadataNull,

    #[error("metadata is empty")]
    MetadataEmpty,

    #[error("document encoding failed: {0}")]
    DocumentFailed(#[from] serde_json::Error),

    #[error("iterator not set")]
    IteratorNull,

    #[error("no more elements to iterate")]
    IteratorExhausted,

    #[error("sql constraint violated: {0}")]
    SqlConstraint(String),

    #[error("sql statement failed: {0}")]
    SqlFailed(String),

    #[error("sql finalize failed: {0}")]
    SqlFinalize(String),

    #[error("sql bind failed: {0}")]
    SqlBind(String),

    #[error("sql prepare failed: {0}")]
    SqlPrepare(String),

    #[error("sql step failed: {0}")]
    SqlStep(String),

    #[error("sql reset failed: {0}")]
    SqlReset(String),

    #[error("bson append failed")]
    BsonAppendFailed,

    #[error("bson document invalid")]
    BsonInvalid,

    #[error("bson value has unexpected type")]
    BsonInvalidType,

    #[error("bson iterator failed to initialize")]
    BsonIterInit,

    #[error("bson iterator failed to recurse")]
    BsonIterRecourse,

    #[error("bson key not found: {0}")]
    BsonKeyNotFound(String),

    #[error("bson operation failed")]
    BsonFailed,

    #[error("threading error: {0}")]
    ThreadingError(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from the message framing / connection layer (spec.md §4.3, §6).
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message body exceeds max-operation-size ({len} > {max})")]
    TooLarge { len: u64, max: u64 },

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("message truncated while reading {0}")]
    Truncated(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors from connection pool management (spec.md §5).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no servers configured for backend kind {0}")]
    NoServers(&'static str),

    #[error("ping handshake failed for server {0}: {1}")]
    HandshakeFailed(String, String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Message(#[from] MessageError),
}
