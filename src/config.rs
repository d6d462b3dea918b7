//! Server configuration loaded from YAML.

use std::{net::SocketAddr, path::PathBuf};

use serde::Deserialize;

fn default_default_timeout_ms() -> u64 {
    2_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
/// Top-level server configuration.
pub struct ServerConfig {
    /// Address the server listens on (e.g. `127.0.0.1:3000`).
    pub listen_addr: SocketAddr,
    /// Path to the routes YAML file.
    pub spec_path: PathBuf,

    #[serde(default = "default_default_timeout_ms")]
    /// Per-request timeout used when an operation doesn't set `x-backend.timeout_ms`.
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_body_bytes")]
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Parse a YAML server config from bytes.
    pub fn from_yaml_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_slice(bytes)?;
        if cfg.default_timeout_ms == 0 {
            anyhow::bail!("default_timeout_ms must be > 0");
        }
        Ok(cfg)
    }
}
