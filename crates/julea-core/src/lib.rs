//! Configuration, semantics, wire messages, statistics and distribution
//! policy for the storage core. No I/O of its own beyond configuration file
//! and message framing; connection handling and backend drivers live in
//! sibling crates.

pub mod component;
pub mod config;
pub mod distribution;
pub mod error;
pub mod message;
pub mod semantics;
pub mod stats;

pub use component::{BackendKind, Component};
pub use config::{BackendSection, Configuration};
pub use distribution::{Distribution, Piece};
pub use error::{BackendError, ConnectionError, MessageError};
pub use message::{requires_reply, Message, MessageFlags, MessageType};
pub use semantics::{Atomicity, Consistency, Persistency, Safety, Security, Semantics, Template};
pub use stats::{Counters, Statistics, ThreadStatistics};
