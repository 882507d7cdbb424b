use crate::{Error, Image, Result};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

/// An image that can be installed, along with the path of its bundle relative
/// to the images root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCandidate {
    /// The image this candidate installs
    pub image: Image,

    /// Bundle location relative to the images root
    pub update_path: String,
}

impl UpdateCandidate {
    /// Create a candidate for `image` served from `update_path`.
    pub fn new(image: Image, update_path: impl Into<String>) -> Self {
        Self {
            image,
            update_path: update_path.into(),
        }
    }
}

impl PartialEq for UpdateCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

impl PartialOrd for UpdateCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.image.partial_cmp(&other.image)
    }
}

impl fmt::Display for UpdateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.image, self.update_path)
    }
}

/// The chain of candidates an image should apply, in order, to be up to date
/// within one release.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePath {
    /// Release every candidate belongs to
    pub release: String,
    candidates: Vec<UpdateCandidate>,
}

#[derive(Deserialize)]
struct UpdatePathData {
    release: String,
    candidates: Vec<UpdateCandidate>,
}

impl<'de> Deserialize<'de> for UpdatePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = UpdatePathData::deserialize(deserializer)?;
        UpdatePath::new(data.release, data.candidates).map_err(serde::de::Error::custom)
    }
}

impl UpdatePath {
    /// Create an update path. Candidates are sorted in ascending order, which
    /// fails if snapshots and versioned images are mixed.
    pub fn new(release: impl Into<String>, mut candidates: Vec<UpdateCandidate>) -> Result<Self> {
        if candidates
            .windows(2)
            .any(|pair| pair[0].image.is_snapshot() != pair[1].image.is_snapshot())
        {
            return Err(Error::Incomparable);
        }
        // Total once snapshots and versioned images are known not to mix
        candidates.sort_by(|a, b| a.image.try_cmp(&b.image).unwrap_or(Ordering::Equal));

        Ok(Self {
            release: release.into(),
            candidates,
        })
    }

    /// The candidates, closest hop first.
    pub fn candidates(&self) -> &[UpdateCandidate] {
        &self.candidates
    }

    /// Replace the candidates without reordering them. Only images can change,
    /// not their order.
    pub fn map_images(self, mut f: impl FnMut(&UpdateCandidate) -> Image) -> Self {
        let candidates = self
            .candidates
            .iter()
            .map(|candidate| UpdateCandidate {
                image: f(candidate),
                update_path: candidate.update_path.clone(),
            })
            .collect();

        Self {
            release: self.release,
            candidates,
        }
    }

    /// The closest hop.
    pub fn first(&self) -> Option<&UpdateCandidate> {
        self.candidates.first()
    }

    /// The most recent image reachable through this path.
    pub fn last(&self) -> Option<&UpdateCandidate> {
        self.candidates.last()
    }

    /// Whether the path has no candidate.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Available update paths for an image: `minor` within its own release,
/// `major` into the next release.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<UpdatePath>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<UpdatePath>,
}

impl Update {
    /// Combine the two update paths.
    pub fn new(minor: Option<UpdatePath>, major: Option<UpdatePath>) -> Self {
        Self { minor, major }
    }

    /// Parse an update file or server response.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to indented JSON.
    pub fn to_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether neither path has a candidate.
    pub fn is_empty(&self) -> bool {
        [&self.minor, &self.major]
            .into_iter()
            .flatten()
            .all(UpdatePath::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(version: &str, buildid: &str) -> UpdateCandidate {
        let image = Image::from_values(
            "steamos", "clockwerk", "atomic", "amd64", version, buildid, false, 0,
        )
        .unwrap();
        UpdateCandidate::new(image, format!("steamos-{buildid}.raucb"))
    }

    #[test]
    fn test_update_path_sorted() {
        let path = UpdatePath::new(
            "clockwerk",
            vec![
                candidate("3.3.0", "20200301"),
                candidate("3.1.0", "20200101"),
                candidate("3.2.0", "20200201"),
            ],
        )
        .unwrap();

        let versions: Vec<String> = path
            .candidates()
            .iter()
            .map(|c| c.image.version_string())
            .collect();
        assert_eq!(versions, ["3.1.0", "3.2.0", "3.3.0"]);
    }

    #[test]
    fn test_update_path_empty() {
        let path = UpdatePath::new("clockwerk", Vec::new()).unwrap();
        assert!(path.is_empty());
        assert!(path.first().is_none());
    }

    #[test]
    fn test_update_path_mixed() {
        let result = UpdatePath::new(
            "clockwerk",
            vec![candidate("3.1.0", "20200101"), candidate("snapshot", "20200201")],
        );
        assert!(matches!(result, Err(Error::Incomparable)));
    }

    #[test]
    fn test_update_round_trip() -> Result<()> {
        let update = Update::new(
            Some(UpdatePath::new(
                "brewmaster",
                vec![candidate("2.1.0", "20200301"), candidate("2.0.0", "20200201")],
            )?),
            Some(UpdatePath::new("clockwerk", vec![candidate("3.0.0", "20200401")])?),
        );

        let parsed = Update::from_json(&update.to_string_pretty()?)?;

        let minor = parsed.minor.as_ref().unwrap();
        assert_eq!(minor.release, "brewmaster");
        assert_eq!(minor.candidates(), update.minor.as_ref().unwrap().candidates());
        assert_eq!(minor.first().unwrap().update_path, "steamos-20200201.raucb");
        assert_eq!(minor.last().unwrap().update_path, "steamos-20200301.raucb");

        let major = parsed.major.as_ref().unwrap();
        assert_eq!(major.release, "clockwerk");
        assert_eq!(major.candidates(), update.major.as_ref().unwrap().candidates());
        Ok(())
    }

    #[test]
    fn test_update_wire_format() -> Result<()> {
        let update = Update::new(
            None,
            Some(UpdatePath::new("clockwerk", vec![candidate("3.0.0", "20200401")])?),
        );
        let value = serde_json::to_value(&update)?;

        assert!(value.get("minor").is_none());
        assert_eq!(value["major"]["release"], "clockwerk");
        assert_eq!(value["major"]["candidates"][0]["update_path"], "steamos-20200401.raucb");
        assert_eq!(value["major"]["candidates"][0]["image"]["buildid"], "20200401.0");
        Ok(())
    }

    #[test]
    fn test_update_from_json_unsorted() -> Result<()> {
        let update = Update::from_json(
            r#"{
                "minor": {
                    "release": "clockwerk",
                    "candidates": [
                        {"image": {"product": "steamos", "release": "clockwerk", "variant": "atomic",
                                   "arch": "amd64", "version": "3.2", "buildid": "20200201"},
                         "update_path": "b.raucb"},
                        {"image": {"product": "steamos", "release": "clockwerk", "variant": "atomic",
                                   "arch": "amd64", "version": "3.1", "buildid": "20200101"},
                         "update_path": "a.raucb"}
                    ]
                }
            }"#,
        )?;

        assert!(update.major.is_none());
        assert_eq!(update.minor.unwrap().first().unwrap().update_path, "a.raucb");
        Ok(())
    }

    #[test]
    fn test_update_is_empty() -> Result<()> {
        assert!(Update::default().is_empty());
        assert!(Update::from_json("{}")?.is_empty());
        assert!(
            !Update::new(
                Some(UpdatePath::new("clockwerk", vec![candidate("3.0.0", "20200401")])?),
                None
            )
            .is_empty()
        );
        Ok(())
    }

    #[test]
    fn test_update_malformed_candidate() {
        let result = Update::from_json(
            r#"{"minor": {"release": "clockwerk", "candidates": [{"image": {}, "update_path": "x"}]}}"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
