use crate::{BuildId, Error, OsRelease, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap, fmt};
use tracing::debug;

/// Version string used on the wire for images without a semantic version.
pub const SNAPSHOT_VERSION: &str = "snapshot";

/// One OS build.
///
/// Two versioned images compare by version alone, two snapshots compare by
/// `(release, buildid)`. Comparing a versioned image against a snapshot is a
/// caller bug: [`Image::try_cmp`] reports it as [`Error::Incomparable`] and
/// the `PartialOrd` implementation returns `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ImageData", into = "ImageData")]
pub struct Image {
    /// Product name, e.g. `steamos`
    pub product: String,

    /// Release codename, e.g. `clockwerk`
    pub release: String,

    /// Product flavor
    pub variant: String,

    /// CPU architecture, `x86_64` is always stored as `amd64`
    pub arch: String,

    /// Semantic version, absent for snapshots
    pub version: Option<Version>,

    /// Build identifier
    pub buildid: BuildId,

    /// Whether this image is a mandatory intermediate hop
    pub checkpoint: bool,

    /// Estimated download size in bytes, zero when unknown
    pub estimated_size: u64,
}

/// Flat wire representation of an [`Image`], as found in manifests, update
/// files and query strings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageData {
    product: Option<String>,
    release: Option<String>,
    variant: Option<String>,
    arch: Option<String>,
    version: Option<String>,
    buildid: Option<String>,
    #[serde(default)]
    checkpoint: bool,
    #[serde(default)]
    estimated_size: u64,
}

impl TryFrom<ImageData> for Image {
    type Error = Error;

    fn try_from(data: ImageData) -> Result<Self> {
        Image::from_values(
            data.product.ok_or(Error::MissingField("product"))?,
            data.release.ok_or(Error::MissingField("release"))?,
            data.variant.ok_or(Error::MissingField("variant"))?,
            data.arch.ok_or(Error::MissingField("arch"))?,
            &data.version.ok_or(Error::MissingField("version"))?,
            &data.buildid.ok_or(Error::MissingField("buildid"))?,
            data.checkpoint,
            data.estimated_size,
        )
    }
}

impl From<Image> for ImageData {
    fn from(image: Image) -> Self {
        Self {
            version: Some(image.version_string()),
            buildid: Some(image.buildid.to_string()),
            product: Some(image.product),
            release: Some(image.release),
            variant: Some(image.variant),
            arch: Some(image.arch),
            checkpoint: image.checkpoint,
            estimated_size: image.estimated_size,
        }
    }
}

/// Values that take precedence over the running system when describing the
/// local image.
#[derive(Debug, Default, Clone)]
#[allow(missing_docs)]
pub struct ImageOverrides {
    pub product: Option<String>,
    pub release: Option<String>,
    pub variant: Option<String>,
    pub arch: Option<String>,
    pub version: Option<String>,
    pub buildid: Option<String>,
}

impl Image {
    /// Create an image from raw values. Every other constructor goes through
    /// here.
    #[allow(clippy::too_many_arguments)]
    pub fn from_values(
        product: impl Into<String>,
        release: impl Into<String>,
        variant: impl Into<String>,
        arch: impl Into<String>,
        version: &str,
        buildid: &str,
        checkpoint: bool,
        estimated_size: u64,
    ) -> Result<Self> {
        let version = if version == SNAPSHOT_VERSION {
            None
        } else {
            Some(coerce_version(version)?)
        };

        let mut arch = arch.into();
        if arch == "x86_64" {
            arch = String::from("amd64");
        }

        Ok(Self {
            product: product.into(),
            release: release.into(),
            variant: variant.into(),
            arch,
            version,
            buildid: buildid.parse()?,
            checkpoint,
            estimated_size,
        })
    }

    /// Parse an image from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let data: ImageData = serde_json::from_str(text)?;
        data.try_into()
    }

    /// Create an image from string pairs, as received in an HTTP query.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self> {
        let checkpoint = match params.get("checkpoint").map(String::as_str) {
            None | Some("") | Some("false") | Some("False") | Some("0") => false,
            Some("true") | Some("True") | Some("1") => true,
            Some(other) => {
                return Err(Error::InvalidField {
                    field: "checkpoint",
                    reason: format!("expected a boolean, got '{other}'"),
                });
            }
        };

        let estimated_size = match params.get("estimated_size") {
            Some(size) => size.parse().map_err(|_| Error::InvalidField {
                field: "estimated_size",
                reason: format!("expected a size in bytes, got '{size}'"),
            })?,
            None => 0,
        };

        ImageData {
            product: params.get("product").cloned(),
            release: params.get("release").cloned(),
            variant: params.get("variant").cloned(),
            arch: params.get("arch").cloned(),
            version: params.get("version").cloned(),
            buildid: params.get("buildid").cloned(),
            checkpoint,
            estimated_size,
        }
        .try_into()
    }

    /// The pairs sent to the update server to describe this image.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("product", self.product.clone()),
            ("release", self.release.clone()),
            ("variant", self.variant.clone()),
            ("arch", self.arch.clone()),
            ("version", self.version_string()),
            ("buildid", self.buildid.to_string()),
            ("checkpoint", self.checkpoint.to_string()),
            ("estimated_size", self.estimated_size.to_string()),
        ]
    }

    /// Describe the running system from `/etc/os-release`, preferring any
    /// supplied override.
    pub fn from_local_system(overrides: ImageOverrides) -> Result<Self> {
        let os_release = OsRelease::load().unwrap_or_else(|error| {
            debug!(error = %error, "No os-release file available");
            OsRelease::default()
        });
        Self::from_os_release(&os_release, overrides)
    }

    /// Describe an image from os-release values, preferring any supplied
    /// override. The architecture falls back to the running platform.
    pub fn from_os_release(os_release: &OsRelease, overrides: ImageOverrides) -> Result<Self> {
        let field = |value: Option<String>, key: &str| -> Result<String> {
            match value {
                Some(value) if !value.is_empty() => Ok(value),
                _ => os_release
                    .get(key)
                    .map(str::to_string)
                    .ok_or_else(|| Error::MissingSystemInfo(format!("no {key} in os-release"))),
            }
        };

        let product = field(overrides.product, "ID")?;
        let release = field(overrides.release, "VERSION_CODENAME")?;
        let variant = field(overrides.variant, "VARIANT_ID")?;
        let version = field(overrides.version, "VERSION_ID")?;
        let buildid = field(overrides.buildid, "BUILD_ID")?;
        let arch = overrides
            .arch
            .filter(|arch| !arch.is_empty())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());

        Self::from_values(product, release, variant, arch, &version, &buildid, false, 0)
    }

    /// The version as written on the wire.
    pub fn version_string(&self) -> String {
        match &self.version {
            Some(version) => version.to_string(),
            None => SNAPSHOT_VERSION.to_string(),
        }
    }

    /// Whether this image has no semantic version.
    pub fn is_snapshot(&self) -> bool {
        self.version.is_none()
    }

    /// Whether this image has a version without a prerelease tag.
    pub fn is_stable(&self) -> bool {
        match &self.version {
            Some(version) => version.pre.is_empty(),
            None => false,
        }
    }

    /// Compare two images, failing if one is a snapshot and the other is not.
    pub fn try_cmp(&self, other: &Image) -> Result<Ordering> {
        match (&self.version, &other.version) {
            (Some(a), Some(b)) => Ok(a.cmp_precedence(b)),
            (None, None) => Ok((&self.release, self.buildid).cmp(&(&other.release, other.buildid))),
            _ => Err(Error::Incomparable),
        }
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.try_cmp(other), Ok(Ordering::Equal))
    }
}

impl PartialOrd for Image {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.try_cmp(other).ok()
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} ({})",
            self.product,
            self.release,
            self.variant,
            self.arch,
            self.version_string(),
            self.buildid
        )?;
        if self.checkpoint {
            write!(f, " [checkpoint]")?;
        }
        Ok(())
    }
}

/// Parse a version string, completing partial versions: `3.5` becomes
/// `3.5.0` and extra numeric components move to the build metadata.
pub fn coerce_version(text: &str) -> Result<Version> {
    let invalid = |reason: String| Error::InvalidField {
        field: "version",
        reason,
    };

    let base_len = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let mut numbers: Vec<&str> = text[..base_len].split('.').collect();
    let mut rest = text[base_len..].to_string();

    // Trailing dot-separated numbers past major.minor.patch are build metadata
    if numbers.len() > 3 {
        let extra = numbers.split_off(3).join(".");
        rest = format!("+{extra}{}", rest.replace('+', "."));
    }
    if numbers.iter().any(|n| n.is_empty()) {
        return Err(invalid(format!("'{text}' is not a version")));
    }
    let mut numbers: Vec<&str> = numbers
        .into_iter()
        .map(|n| match n.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        })
        .collect();
    while numbers.len() < 3 {
        numbers.push("0");
    }

    let rest: String = rest
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let (prerelease, build) = match rest.chars().next() {
        None => ("", String::new()),
        Some('+') => ("", rest[1..].replace('+', ".")),
        Some('-') => match rest[1..].split_once('+') {
            Some((pre, build)) => (pre, build.replace('+', ".")),
            None => (&rest[1..], String::new()),
        },
        Some(_) => match rest.split_once('+') {
            Some((pre, build)) => (pre, build.replace('+', ".")),
            None => (rest.as_str(), String::new()),
        },
    };

    let mut coerced = numbers.join(".");
    if !prerelease.is_empty() {
        coerced.push('-');
        coerced.push_str(prerelease);
    }
    if !build.is_empty() {
        coerced.push('+');
        coerced.push_str(&build);
    }

    Version::parse(&coerced).map_err(|e| invalid(format!("'{text}': {e}")))
}
