//! Backend component mask: whether a loaded backend acts as a client-side
//! (issues messages) or server-side (performs I/O) component, or both.
//!
//! Grounded on `original_source/include/core/jbackend.h`'s
//! `JBackendComponent` bitmask (`J_BACKEND_COMPONENT_CLIENT = 1 << 0`,
//! `J_BACKEND_COMPONENT_SERVER = 1 << 1`). The retrieval pack shows the
//! idiomatic Rust translation of a capability bitmask is `bitflags`
//! (`dbflux_core::traits::SchemaFeatures`).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Component: u8 {
        const CLIENT = 1 << 0;
        const SERVER = 1 << 1;
    }
}

impl std::str::FromStr for Component {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Component::CLIENT),
            "server" => Ok(Component::SERVER),
            other => anyhow::bail!("unknown backend component: {other}"),
        }
    }
}

/// One of the three backend kinds a configuration (and the wire protocol)
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Object,
    Kv,
    Db,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Object => "object",
            BackendKind::Kv => "kv",
            BackendKind::Db => "db",
        }
    }
}
