//! Batch/operation engine, operation cache, and the object/KV/DB facades
//! applications build batches from.
//!
//! Grounded on spec.md §3's architecture line: applications only ever
//! construct a [`Client`], stage operations on a [`Batch`] through [`kv`],
//! [`object`] or [`db`], and call [`Batch::execute`] — `julea-net` and
//! `julea-backend` stay internal plumbing wired together by [`Client::new`].

pub mod db;
pub mod kv;
pub mod object;

mod batch;
mod cache;
mod context;
mod operation;
mod wire;

pub use batch::Batch;
pub use context::Client;
pub use operation::Slot;

pub use julea_core::{Consistency, Semantics, Template};
