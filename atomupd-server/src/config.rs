use anyhow::{Context, Result};
use atomupd::pool::PoolConfig;
use serde::Deserialize;
use std::path::Path;

/// Server configuration, read from a TOML file.
///
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 5000
/// admin_port = 5001
///
/// [images]
/// pool_dir = "/srv/images"
/// snapshots = false
/// unstable = false
/// products = ["steamos"]
/// releases = ["brewmaster", "clockwerk"]
/// variants = ["atomic"]
/// archs = ["amd64"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    pub images: PoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Loopback port accepting reload and dump requests
    pub admin_port: Option<u16>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_port: None,
        }
    }
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    5000
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Please provide a valid configuration file: {}", path.display()))
    }
}
