use crate::{Error, Image, Result};
use std::path::Path;

/// File name suffix of image manifests.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// On-disk descriptor of one image, stored as flat JSON next to its bundle.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The described image
    pub image: Image,
}

impl Manifest {
    /// Describe `image`.
    pub fn new(image: Image) -> Self {
        Self { image }
    }

    /// Read a manifest file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let malformed = |reason: String| Error::MalformedManifest {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
        let image = Image::from_json(&content).map_err(|e| malformed(e.to_string()))?;

        Ok(Self { image })
    }

    /// Serialize to the indented manifest JSON.
    pub fn to_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.image)?)
    }

    /// Write the manifest to the given path.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_string_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("steamos-3.1{MANIFEST_SUFFIX}"));

        let image = Image::from_values(
            "steamos", "clockwerk", "atomic", "amd64", "3.1.0", "20200101.1", true, 1024,
        )?;
        Manifest::new(image.clone()).write(&path)?;

        let manifest = Manifest::from_file(&path)?;
        assert_eq!(manifest.image, image);
        assert!(manifest.image.checkpoint);
        assert_eq!(manifest.image.estimated_size, 1024);
        Ok(())
    }

    #[test]
    fn test_missing_buildid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.manifest.json");
        std::fs::write(
            &path,
            r#"{"product": "steamos", "release": "clockwerk", "variant": "atomic",
                "arch": "amd64", "version": "3.1"}"#,
        )?;

        match Manifest::from_file(&path) {
            Err(Error::MalformedManifest { reason, .. }) => assert!(reason.contains("buildid")),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Manifest::from_file("/nonexistent/image.manifest.json"),
            Err(Error::MalformedManifest { .. })
        ));
    }
}
