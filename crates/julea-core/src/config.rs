//! Configuration: parses the INI file described in spec.md §6 and exposes
//! server lists, backend selection, per-backend path template, max
//! operation size, max connections and stripe size.
//!
//! Grounded on `original_source/lib/jconfiguration.c`'s search order
//! (`j_configuration_new`): an absolute `$JULEA_CONFIG` path wins outright;
//! otherwise the basename of `$JULEA_CONFIG` (or `"julea"`) is looked up
//! under `$XDG_CONFIG_HOME/julea/<name>`, then each
//! `$XDG_CONFIG_DIRS/julea/<name>` in order. Parsing itself uses the `ini`
//! crate rather than `GKeyFile`, and path resolution uses `dirs` rather than
//! glib's `g_get_user_config_dir`/`g_get_system_config_dirs`.
//!
//! Unlike the original's refcounted `JConfiguration`, this is a plain value
//! wrapped in `Arc` by callers (per SPEC_FULL.md's ownership mapping) —
//! there is no reference count to manage by hand.

use std::path::{Path, PathBuf};

use crate::component::Component;

const DEFAULT_MAX_OPERATION_SIZE: u64 = 512 * 1024;
const DEFAULT_STRIPE_SIZE: u64 = 512 * 1024;
const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_PORT: u16 = 4711;

/// Per-backend-kind settings: which driver to load, on which side
/// (client/server), and where it stores its data.
#[derive(Debug, Clone)]
pub struct BackendSection {
    pub backend: String,
    pub component: Component,
    /// May contain a `{PORT}` placeholder, substituted at server start.
    pub path: String,
}

impl BackendSection {
    /// Resolves `{PORT}` in the path template, as the server binary does
    /// before handing the path to a driver's `init()`.
    pub fn resolved_path(&self, port: u16) -> String {
        self.path.replace("{PORT}", &port.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub max_operation_size: u64,
    pub max_connections: u32,
    pub stripe_size: u64,
    pub object_servers: Vec<String>,
    pub kv_servers: Vec<String>,
    pub db_servers: Vec<String>,
    pub object: BackendSection,
    pub kv: BackendSection,
    pub db: BackendSection,
}

impl Configuration {
    pub fn servers(&self, kind: crate::component::BackendKind) -> &[String] {
        match kind {
            crate::component::BackendKind::Object => &self.object_servers,
            crate::component::BackendKind::Kv => &self.kv_servers,
            crate::component::BackendKind::Db => &self.db_servers,
        }
    }

    pub fn backend_section(&self, kind: crate::component::BackendKind) -> &BackendSection {
        match kind {
            crate::component::BackendKind::Object => &self.object,
            crate::component::BackendKind::Kv => &self.kv,
            crate::component::BackendKind::Db => &self.db,
        }
    }

    /// `host[:port]` split, defaulting to the protocol's well-known port.
    pub fn server_addr(server: &str) -> (String, u16) {
        match server.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(p) => (host.to_string(), p),
                Err(_) => (server.to_string(), DEFAULT_PORT),
            },
            None => (server.to_string(), DEFAULT_PORT),
        }
    }

    /// Locates and parses the configuration file, following spec.md §6's
    /// search order.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::locate()?;
        Self::load_from_path(&path)
    }

    pub fn locate() -> anyhow::Result<PathBuf> {
        if let Ok(env_path) = std::env::var("JULEA_CONFIG") {
            let p = PathBuf::from(&env_path);
            if p.is_absolute() {
                if p.exists() {
                    return Ok(p);
                }
                anyhow::bail!("JULEA_CONFIG points at a missing file: {}", p.display());
            }

            // Relative: the basename becomes `<name>` in the search below.
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "julea".to_string());
            return Self::search(&name).ok_or_else(|| anyhow::anyhow!("no configuration named '{name}' found"));
        }

        Self::search("julea").ok_or_else(|| anyhow::anyhow!("no configuration found (set JULEA_CONFIG)"))
    }

    fn search(name: &str) -> Option<PathBuf> {
        if let Some(config_home) = dirs::config_dir() {
            let candidate = config_home.join("julea").join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        for dir in system_config_dirs() {
            let candidate = dir.join("julea").join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        None
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| anyhow::anyhow!("can not open configuration file {}: {e}", path.display()))?;

        let core = ini.section(Some("core"));
        let clients = ini.section(Some("clients"));
        let servers = ini.section(Some("servers"));

        let max_operation_size = core
            .and_then(|s| s.get("max-operation-size"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_OPERATION_SIZE);

        let max_connections = clients
            .and_then(|s| s.get("max-connections"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let stripe_size = clients
            .and_then(|s| s.get("stripe-size"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_STRIPE_SIZE);

        let object_servers = split_list(servers.and_then(|s| s.get("object")));
        let kv_servers = split_list(servers.and_then(|s| s.get("kv")));
        let db_servers = split_list(servers.and_then(|s| s.get("db")));

        Ok(Self {
            max_operation_size,
            max_connections,
            stripe_size,
            object_servers,
            kv_servers,
            db_servers,
            object: backend_section(&ini, "object")?,
            kv: backend_section(&ini, "kv")?,
            db: backend_section(&ini, "db")?,
        })
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn backend_section(ini: &ini::Ini, group: &str) -> anyhow::Result<BackendSection> {
    let section = ini.section(Some(group)).ok_or_else(|| anyhow::anyhow!("missing [{group}] section"))?;

    let backend = section.get("backend").ok_or_else(|| anyhow::anyhow!("[{group}] missing 'backend'"))?.to_string();
    let component: Component = section.get("component").unwrap_or("client").parse()?;
    let path = section.get("path").unwrap_or("").to_string();

    Ok(BackendSection { backend, component, path })
}

/// `$XDG_CONFIG_DIRS`-equivalent search path, falling back to `/etc/xdg`
/// the way glib's `g_get_system_config_dirs` does when the env var is unset.
fn system_config_dirs() -> Vec<PathBuf> {
    match std::env::var("XDG_CONFIG_DIRS") {
        Ok(v) if !v.is_empty() => v.split(':').map(PathBuf::from).collect(),
        _ => vec![PathBuf::from("/etc/xdg")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_ini() -> &'static str {
        "[core]\n\
         max-operation-size = 1048576\n\
         [clients]\n\
         max-connections = 4\n\
         stripe-size = 65536\n\
         [servers]\n\
         object = host1,host2\n\
         kv = host1\n\
         db = host1\n\
         [object]\n\
         backend = posix\n\
         component = server\n\
         path = /tmp/julea/object-{PORT}\n\
         [kv]\n\
         backend = memory\n\
         component = server\n\
         path = /tmp/julea/kv\n\
         [db]\n\
         backend = memory\n\
         component = server\n\
         path = /tmp/julea/db\n"
    }

    #[test]
    fn parses_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_ini().as_bytes()).unwrap();

        let cfg = Configuration::load_from_path(file.path()).unwrap();
        assert_eq!(cfg.max_operation_size, 1_048_576);
        assert_eq!(cfg.max_connections, 4);
        assert_eq!(cfg.object_servers, vec!["host1", "host2"]);
        assert_eq!(cfg.object.backend, "posix");
        assert_eq!(cfg.object.component, Component::SERVER);
        assert_eq!(cfg.object.resolved_path(4711), "/tmp/julea/object-4711");
    }

    #[test]
    fn server_addr_defaults_port() {
        assert_eq!(Configuration::server_addr("host1"), ("host1".to_string(), 4711));
        assert_eq!(Configuration::server_addr("host1:9000"), ("host1".to_string(), 9000));
    }
}
