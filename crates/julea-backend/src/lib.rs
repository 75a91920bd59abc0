//! Backend vtables (object/kv/db) and in-process reference drivers.
//!
//! Concrete production backends (POSIX, GDBM, LevelDB, LMDB, RocksDB,
//! SQLite, MongoDB, RADOS, GIO) are plug-ins outside this core, per
//! spec.md §1; the drivers here exist to give the client/server crates
//! something real to call while exercising the same vtable contract those
//! plug-ins would satisfy.

pub mod db;
pub mod kv;
pub mod object;
pub mod registry;

pub use db::{DbBackend, DbBatch, Document, MemoryDbBackend, Operator, QueryIterator, Selector, SelectorMode};
pub use kv::{KvBackend, KvBatch, MemoryKvBackend};
pub use object::{ObjectBackend, ObjectHandle, ObjectStatus, PosixObjectBackend};
pub use registry::{load_db, load_kv, load_object, DbDriver, KvDriver, ObjectDriver};
