use crate::Result;
use regex::Regex;
use std::{collections::HashMap, path::Path, sync::OnceLock};

/// Locations of the os-release file, in order of preference.
const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

/// Key/value pairs of an os-release file.
#[derive(Debug, Default, Clone)]
pub struct OsRelease(HashMap<String, String>);

fn line_regex() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r#"^([^\s=]+)=(?:[\s"']*)(.+?)(?:[\s"']*)$"#).expect("static regex")
    })
}

impl OsRelease {
    /// Load the os-release file of the running system.
    pub fn load() -> Result<Self> {
        let path = OS_RELEASE_PATHS
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .unwrap_or(Path::new(OS_RELEASE_PATHS[0]));

        Self::from_file(path)
    }

    /// Load an os-release formatted file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse os-release content. Lines that are not assignments are ignored.
    pub fn parse(content: &str) -> Self {
        Self(
            content
                .lines()
                .filter_map(|line| line_regex().captures(line))
                .map(|captures| (captures[1].to_string(), captures[2].to_string()))
                .collect(),
        )
    }

    /// Get the value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}
