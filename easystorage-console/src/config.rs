//! Load node config from file and environment.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use easystorage_core::{ConfigError, NodeConfig};
use tracing::{debug, warn};

/// Env overrides, applied after the file.
const ENV_API_PORT: &str = "EASYSTORAGE_API_PORT";
const ENV_DISC_PORT: &str = "EASYSTORAGE_DISC_PORT";
const ENV_DATA_DIR: &str = "EASYSTORAGE_DATA_DIR";
const ENV_LOG_LEVEL: &str = "EASYSTORAGE_LOG_LEVEL";
const ENV_BOOTSTRAP_NODE: &str = "EASYSTORAGE_BOOTSTRAP_NODE";
const ENV_NAT: &str = "EASYSTORAGE_NAT";

/// Which program the node runs for. Uploader and downloader get their own ports and data dir
/// so both can run side by side on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Console,
    Uploader,
    Downloader,
}

impl Role {
    pub fn defaults(self) -> NodeConfig {
        let (api_port, disc_port, data_dir) = match self {
            Role::Console => return NodeConfig::default(),
            Role::Uploader => (8080, 9090, "./uploader-data"),
            Role::Downloader => (8081, 9091, "./downloader-data"),
        };
        NodeConfig {
            api_port,
            disc_port,
            data_dir: Some(PathBuf::from(data_dir)),
            ..NodeConfig::default()
        }
    }
}

/// Load config: the role's defaults, then the INI file, then env vars.
/// An explicit path must be readable; otherwise the first existing file of
/// `~/.config/easystorage/config.ini` and `/etc/easystorage/config.ini` is used if valid.
pub fn load(explicit: Option<&Path>, role: Role) -> Result<NodeConfig, ConfigError> {
    let mut c = match explicit {
        Some(path) => read_file(role.defaults(), path)?,
        None => load_file(role),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn read_file(mut base: NodeConfig, path: &Path) -> Result<NodeConfig, ConfigError> {
    base.apply_ini(BufReader::new(File::open(path)?))?;
    Ok(base)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/easystorage/config.ini"));
    }
    out.push(PathBuf::from("/etc/easystorage/config.ini"));
    out
}

fn load_file(role: Role) -> NodeConfig {
    let Some(path) = config_paths().into_iter().find(|p| p.exists()) else {
        return role.defaults();
    };
    match read_file(role.defaults(), &path) {
        Ok(c) => {
            debug!(path = %path.display(), ?role, "loaded config");
            c
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            role.defaults()
        }
    }
}

fn apply_env(c: &mut NodeConfig, lookup: impl Fn(&str) -> Option<String>) {
    for (key, port) in [
        (ENV_API_PORT, &mut c.api_port),
        (ENV_DISC_PORT, &mut c.disc_port),
    ] {
        if let Some(s) = lookup(key) {
            match s.parse::<u16>() {
                Ok(p) => *port = p,
                Err(_) => warn!(key, value = %s, "ignoring invalid port"),
            }
        }
    }
    if let Some(s) = lookup(ENV_DATA_DIR) {
        c.data_dir = Some(PathBuf::from(s));
    }
    if let Some(s) = lookup(ENV_LOG_LEVEL) {
        c.log_level = Some(s);
    }
    if let Some(s) = lookup(ENV_BOOTSTRAP_NODE) {
        c.bootstrap_node = Some(s);
    }
    if let Some(s) = lookup(ENV_NAT) {
        c.nat = Some(s);
    }
}
