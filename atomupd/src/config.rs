use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Default location of the client configuration.
pub const DEFAULT_CLIENT_CONFIG: &str = "/etc/atomupd/client.toml";

/// Client configuration, read from a TOML file.
///
/// ```toml
/// [server]
/// query_url = "https://images.example.com/updates"
/// images_url = "https://images.example.com/pool/"
///
/// [host]
/// runtime_dir = "/run/atomupd"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server: ServerSection,

    #[serde(default)]
    pub host: HostSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Where update queries are sent
    pub query_url: Url,

    /// Base that candidate update paths are resolved against
    pub images_url: Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSection {
    /// Manifest describing the running image, os-release is used otherwise
    pub manifest: Option<PathBuf>,

    /// Where the update file and temporary artifacts live
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            manifest: None,
            runtime_dir: default_runtime_dir(),
        }
    }
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/run/atomupd")
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: ClientConfig = toml::from_str(content)?;

        // Update paths are relative, so the base must behave like a directory
        if !config.server.images_url.path().ends_with('/') {
            let path = format!("{}/", config.server.images_url.path());
            config.server.images_url.set_path(&path);
        }
        Ok(config)
    }

    /// Where the latest server response is kept.
    pub fn update_file(&self) -> PathBuf {
        self.host.runtime_dir.join("update.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() -> Result<()> {
        let config = ClientConfig::parse(
            r#"
            [server]
            query_url = "https://example.com/updates"
            images_url = "https://example.com/pool"

            [host]
            manifest = "/etc/steamos.manifest.json"
            runtime_dir = "/tmp/atomupd"
            "#,
        )?;

        assert_eq!(config.server.query_url.as_str(), "https://example.com/updates");
        assert_eq!(config.server.images_url.as_str(), "https://example.com/pool/");
        assert_eq!(
            config.host.manifest.as_deref(),
            Some(Path::new("/etc/steamos.manifest.json"))
        );
        assert_eq!(config.update_file(), Path::new("/tmp/atomupd/update.json"));
        Ok(())
    }

    #[test]
    fn test_parse_defaults() -> Result<()> {
        let config = ClientConfig::parse(
            r#"
            [server]
            query_url = "http://localhost:5000"
            images_url = "http://localhost:8000/"
            "#,
        )?;

        assert!(config.host.manifest.is_none());
        assert_eq!(config.host.runtime_dir, Path::new("/run/atomupd"));
        assert_eq!(config.server.images_url.as_str(), "http://localhost:8000/");
        Ok(())
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ClientConfig::parse("[server]\nquery_url = \"http://localhost\"\n").is_err());
        assert!(
            ClientConfig::parse("[server]\nquery_url = \"nope\"\nimages_url = \"nope\"\n").is_err()
        );
        assert!(ClientConfig::load("/nonexistent/client.toml").is_err());
    }
}
