//! Connection pooling and the server dispatch loop: the network edge
//! between clients and the backend drivers in `julea-backend`.

pub mod connection;
pub mod pool;
pub mod server;

pub use connection::Connection;
pub use pool::{Pools, ServerPool};
pub use server::{serve, Backends};
