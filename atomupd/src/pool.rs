use atomupd_image::{Image, MANIFEST_SUFFIX, Manifest, Update, UpdateCandidate, UpdatePath};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// File name suffix of installable bundles.
pub const BUNDLE_SUFFIX: &str = ".raucb";

/// Directory name suffix of content-addressable chunk stores.
pub const CHUNK_STORE_SUFFIX: &str = ".castr";

/// What an image pool indexes and which images it accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Root of the image tree
    pub pool_dir: PathBuf,

    /// Serve snapshots instead of versioned images
    #[serde(default)]
    pub snapshots: bool,

    /// Serve images with a prerelease version
    #[serde(default)]
    pub unstable: bool,

    pub products: Vec<String>,

    /// Must be sorted, a release is upgraded to the one following it
    pub releases: Vec<String>,

    pub variants: Vec<String>,

    pub archs: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("images dir '{}' does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("release list {0:?} is not sorted")]
    UnsortedReleases(Vec<String>),

    #[error("image is not supported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Image(#[from] atomupd_image::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a manifest found during a scan was not added to the pool.
#[derive(thiserror::Error, Debug)]
enum Discard {
    #[error("{0}")]
    Malformed(atomupd_image::Error),

    #[error("no bundle at {}", .0.display())]
    MissingBundle(PathBuf),

    #[error("no chunk store at {}", .0.display())]
    MissingChunkStore(PathBuf),

    #[error("{0}")]
    Unsupported(String),

    #[error("image is unstable")]
    Unstable,
}

/// Outcome of a pool scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Manifests added as update candidates
    pub loaded: usize,

    /// Manifests discarded
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    product: String,
    release: String,
    variant: String,
    arch: String,
}

/// Index of every update candidate found in an image tree.
///
/// A pool is built once by walking the tree and is never modified afterwards;
/// picking up new images means building a new pool. Candidates are grouped by
/// `(product, release, variant, arch)` and a bucket exists for every
/// combination of the supported values.
pub struct ImagePool {
    config: PoolConfig,
    buckets: BTreeMap<BucketKey, Vec<UpdateCandidate>>,
    report: ScanReport,
}

impl ImagePool {
    /// Scan the configured image tree.
    pub fn new(mut config: PoolConfig) -> Result<Self, PoolError> {
        if !config.pool_dir.is_dir() {
            return Err(PoolError::MissingDirectory(config.pool_dir));
        }
        config.pool_dir = std::path::absolute(&config.pool_dir)?;

        if !config.releases.is_sorted() {
            return Err(PoolError::UnsortedReleases(config.releases));
        }

        // Snapshots don't have a stable version
        if config.snapshots {
            config.unstable = true;
        }

        let mut buckets = BTreeMap::new();
        for product in &config.products {
            for release in &config.releases {
                for variant in &config.variants {
                    for arch in &config.archs {
                        buckets.insert(
                            BucketKey {
                                product: product.clone(),
                                release: release.clone(),
                                variant: variant.clone(),
                                arch: arch.clone(),
                            },
                            Vec::new(),
                        );
                    }
                }
            }
        }

        let mut pool = Self {
            config,
            buckets,
            report: ScanReport::default(),
        };
        pool.scan();
        Ok(pool)
    }

    fn scan(&mut self) {
        let images_dir = self.config.pool_dir.clone();
        debug!(path = ?images_dir, "Walking the image tree");

        let walker = WalkDir::new(&images_dir).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && entry.file_name().to_string_lossy().ends_with(CHUNK_STORE_SUFFIX))
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(error = %error, "Failed to walk the image tree");
                    continue;
                }
            };
            if entry.file_type().is_dir()
                || !entry.file_name().to_string_lossy().ends_with(MANIFEST_SUFFIX)
            {
                continue;
            }

            let path = entry.path();
            match self.load_candidate(&images_dir, path) {
                Ok((key, candidate)) => {
                    debug!(manifest = ?path, "Update candidate added");
                    if let Some(bucket) = self.buckets.get_mut(&key) {
                        bucket.push(candidate);
                    }
                    self.report.loaded += 1;
                }
                Err(Discard::Malformed(error)) => {
                    error!(manifest = ?path, error = %error, "Failed to create image from manifest");
                    self.report.skipped += 1;
                }
                Err(reason) => {
                    debug!(manifest = ?path, reason = %reason, "Discarded manifest");
                    self.report.skipped += 1;
                }
            }
        }
    }

    fn load_candidate(
        &self,
        images_dir: &Path,
        manifest_path: &Path,
    ) -> Result<(BucketKey, UpdateCandidate), Discard> {
        let image = Manifest::from_file(manifest_path)
            .map_err(Discard::Malformed)?
            .image;

        let file_name = manifest_path.file_name().unwrap_or_default().to_string_lossy();
        let stem = file_name.strip_suffix(MANIFEST_SUFFIX).unwrap_or(&file_name);
        let parent = manifest_path.parent().unwrap_or(images_dir);

        let bundle = parent.join(format!("{stem}{BUNDLE_SUFFIX}"));
        if !bundle.is_file() {
            return Err(Discard::MissingBundle(bundle));
        }
        let chunk_store = parent.join(format!("{stem}{CHUNK_STORE_SUFFIX}"));
        if !chunk_store.is_dir() {
            return Err(Discard::MissingChunkStore(chunk_store));
        }
        let update_path = bundle
            .strip_prefix(images_dir)
            .unwrap_or(&bundle)
            .to_string_lossy()
            .to_string();

        let key = self
            .bucket_key(&image, &image.release)
            .map_err(|e| Discard::Unsupported(e.to_string()))?;

        if !self.config.unstable && !image.is_stable() {
            return Err(Discard::Unstable);
        }

        Ok((key, UpdateCandidate::new(image, update_path)))
    }

    /// Locate the bucket an image belongs to, using `release` in place of the
    /// image's own release.
    fn bucket_key(&self, image: &Image, release: &str) -> Result<BucketKey, PoolError> {
        if image.is_snapshot() != self.config.snapshots {
            return Err(PoolError::Unsupported(if self.config.snapshots {
                String::from("image has a version, however only snapshots are supported")
            } else {
                String::from("image is a snapshot, however only versions are supported")
            }));
        }

        let release = release.to_string();
        for (kind, value, supported) in [
            ("product", &image.product, &self.config.products),
            ("release", &release, &self.config.releases),
            ("variant", &image.variant, &self.config.variants),
            ("arch", &image.arch, &self.config.archs),
        ] {
            if !supported.contains(value) {
                return Err(PoolError::Unsupported(format!("unknown {kind} '{value}'")));
            }
        }

        Ok(BucketKey {
            product: image.product.clone(),
            release,
            variant: image.variant.clone(),
            arch: image.arch.clone(),
        })
    }

    fn candidates(&self, image: &Image, release: &str) -> Result<&[UpdateCandidate], PoolError> {
        let key = self.bucket_key(image, release)?;
        self.buckets
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| PoolError::Unsupported(format!("no bucket for {key:?}")))
    }

    /// Update path for `image` within `release`, if any.
    pub fn get_updates_for_release(
        &self,
        image: &Image,
        release: &str,
    ) -> Result<Option<UpdatePath>, PoolError> {
        let all_candidates = match self.candidates(image, release) {
            Ok(candidates) => candidates,
            Err(PoolError::Unsupported(reason)) => {
                debug!(image = %image, release, reason = %reason, "No candidates for unsupported image");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let winners = select_candidates(all_candidates, image)?;
        if winners.is_empty() {
            return Ok(None);
        }

        Ok(Some(UpdatePath::new(release, winners)?))
    }

    /// Updates for `image` within its own release and within the release
    /// following it.
    pub fn get_updates(&self, image: &Image) -> Result<Option<Update>, PoolError> {
        let minor = self.get_updates_for_release(image, &image.release)?;

        let major = match next_release(&image.release, &self.config.releases) {
            Some(release) => self.get_updates_for_release(image, release)?,
            None => None,
        };

        if minor.is_none() && major.is_none() {
            return Ok(None);
        }
        Ok(Some(Update::new(minor, major)))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn report(&self) -> ScanReport {
        self.report
    }

    /// Log a summary of the pool.
    pub fn log_summary(&self) {
        info!(
            path = ?self.config.pool_dir,
            loaded = self.report.loaded,
            skipped = self.report.skipped,
            "Image pool ready",
        );
    }
}

impl fmt::Display for ImagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Images dir: {}", self.config.pool_dir.display())?;
        writeln!(f, "Snapshots : {}", self.config.snapshots)?;
        writeln!(f, "Unstable  : {}", self.config.unstable)?;
        writeln!(f, "Products  : {:?}", self.config.products)?;
        writeln!(f, "Releases  : {:?}", self.config.releases)?;
        writeln!(f, "Variants  : {:?}", self.config.variants)?;
        writeln!(f, "Archs     : {:?}", self.config.archs)?;
        writeln!(
            f,
            "Manifests : {} loaded, {} skipped",
            self.report.loaded, self.report.skipped
        )?;
        writeln!(f, "Candidates:")?;
        for (key, candidates) in &self.buckets {
            if candidates.is_empty() {
                continue;
            }
            writeln!(
                f,
                "  {}/{}/{}/{}:",
                key.product, key.release, key.variant, key.arch
            )?;
            for candidate in candidates {
                writeln!(f, "    {candidate}")?;
            }
        }
        Ok(())
    }
}

/// The release following `release`, without wrapping around.
pub fn next_release<'a>(release: &str, releases: &'a [String]) -> Option<&'a str> {
    let index = releases.iter().position(|r| r == release)?;
    releases.get(index + 1).map(String::as_str)
}

/// Pick the valid update candidates for `image`: every checkpoint newer than
/// it, plus the newest candidate.
///
/// Checkpoints are hops that must not be skipped. The newest candidate is
/// always offered so that a device can go straight to it once no checkpoint
/// stands in between.
pub fn select_candidates(
    candidates: &[UpdateCandidate],
    image: &Image,
) -> Result<Vec<UpdateCandidate>, atomupd_image::Error> {
    let mut latest: Option<&UpdateCandidate> = None;
    let mut winners: Vec<&UpdateCandidate> = Vec::new();

    for candidate in candidates {
        if candidate.image.try_cmp(image)? != Ordering::Greater {
            continue;
        }

        if candidate.image.checkpoint {
            winners.push(candidate);
        }

        match latest {
            Some(current) if candidate.image.try_cmp(&current.image)? != Ordering::Greater => {}
            _ => latest = Some(candidate),
        }
    }

    if let Some(latest) = latest {
        if !winners.iter().any(|winner| winner.image == latest.image) {
            winners.push(latest);
        }
    }

    Ok(winners.into_iter().cloned().collect())
}
