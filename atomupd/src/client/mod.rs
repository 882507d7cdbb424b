use crate::config::ClientConfig;
use anyhow::Context;
use atomupd_image::{
    BuildId, Image, ImageOverrides, Manifest, Update, UpdateCandidate, UpdatePath,
};
use desync::{ChunkStore, SizeEstimator};
use progress::ProgressMonitor;
use rauc::{Installer, remove_if_exists};
use std::{
    io::Write,
    path::PathBuf,
    time::Duration,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub mod desync;
pub mod progress;
pub mod rauc;

/// Default manifest describing the running image.
pub const DEFAULT_MANIFEST: &str = "/etc/atomupd/manifest.json";

/// How long the progress monitor may keep running once the install returns.
const PROGRESS_GRACE: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("{program} failed with code {code}: {output}")]
    Tool {
        program: String,
        code: i32,
        output: String,
    },

    #[error("unexpected installer status: {0}")]
    InstallerStatus(String),

    #[error("failed to estimate the download size: {0}")]
    Estimation(String),

    #[error("the requested update version {0} is not a valid option")]
    VersionNotOffered(BuildId),

    #[error(transparent)]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Image(#[from] atomupd_image::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where the description of the running image comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Manifest(PathBuf),
    LocalSystem,
}

impl ImageSource {
    /// An explicit manifest wins over the configured one, unless the image
    /// should be described from the running system.
    pub fn choose(local_system: bool, manifest: Option<PathBuf>, config: &ClientConfig) -> Self {
        if local_system {
            return Self::LocalSystem;
        }
        Self::Manifest(
            manifest
                .or_else(|| config.host.manifest.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST)),
        )
    }

    pub fn load(&self) -> Result<Image, ClientError> {
        match self {
            Self::Manifest(path) => {
                debug!(path = ?path, "Using manifest file");
                Ok(Manifest::from_file(path)?.image)
            }
            Self::LocalSystem => {
                debug!("Not using any manifest file, making one instead");
                Ok(Image::from_local_system(ImageOverrides::default())?)
            }
        }
    }
}

/// What a client invocation should do.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub image_source: ImageSource,

    /// Replaces the variant of the running image
    pub variant: Option<String>,

    /// Use this update file instead of querying the server
    pub update_file: Option<PathBuf>,

    /// Install this bundle directly
    pub update_from_url: Option<String>,

    /// Only install this build
    pub update_version: Option<BuildId>,

    pub query_only: bool,

    pub estimate_download_size: bool,
}

/// Pick the candidate to install: the closest hop of the major path, or else
/// of the minor path. With a `target`, only a closest hop with that build id
/// qualifies.
pub fn select_candidate<'a>(
    update: &'a Update,
    target: Option<&BuildId>,
) -> Result<Option<&'a UpdateCandidate>, ClientError> {
    let candidate = [&update.major, &update.minor]
        .into_iter()
        .flatten()
        .filter_map(UpdatePath::first)
        .find(|candidate| target.is_none_or(|target| *target == candidate.image.buildid));

    match (candidate, target) {
        (Some(candidate), _) => Ok(Some(candidate)),
        (None, Some(target)) => Err(ClientError::VersionNotOffered(*target)),
        (None, None) => Ok(None),
    }
}

fn log_update(path: &UpdatePath) {
    debug!(release = %path.release, "An update is available");
    if let Some(first) = path.first() {
        debug!(
            version = %first.image.version_string(),
            buildid = %first.image.buildid,
            update_path = %first.update_path,
            "Next hop",
        );
    }
    if path.candidates().len() > 1 {
        if let Some(last) = path.last() {
            debug!(
                version = %last.image.version_string(),
                buildid = %last.image.buildid,
                hops = path.candidates().len(),
                "Final destination",
            );
        }
    }
}

/// Resolves the update for the running image against a server and drives the
/// installer.
pub struct UpdateClient {
    config: ClientConfig,
    installer: Box<dyn Installer>,
    chunk_store: Box<dyn ChunkStore>,
    quiet: bool,
}

impl UpdateClient {
    pub fn new(
        config: ClientConfig,
        installer: impl Installer + 'static,
        chunk_store: impl ChunkStore + 'static,
        quiet: bool,
    ) -> Self {
        Self {
            config,
            installer: Box::new(installer),
            chunk_store: Box::new(chunk_store),
            quiet,
        }
    }

    fn estimator(&self) -> SizeEstimator<'_> {
        SizeEstimator {
            runtime_dir: &self.config.host.runtime_dir,
            images_url: &self.config.server.images_url,
            installer: self.installer.as_ref(),
            chunk_store: self.chunk_store.as_ref(),
        }
    }

    pub fn run(&self, options: &UpdateOptions) -> anyhow::Result<()> {
        let runtime_dir = &self.config.host.runtime_dir;
        if !runtime_dir.is_dir() {
            debug!(path = ?runtime_dir, "Creating runtime dir");
            std::fs::create_dir_all(runtime_dir)?;
        }

        if let Some(url) = &options.update_from_url {
            info!(url = %url, "Installing an update from the given URL");
            return self
                .apply(url)
                .context("Failed to install update from URL");
        }

        let update_file = match &options.update_file {
            Some(path) => path.clone(),
            None => {
                let mut image = options.image_source.load()?;
                if let Some(variant) = &options.variant {
                    image.variant = variant.clone();
                }

                match self
                    .fetch_update(&image)
                    .context("Failed to download update file")?
                {
                    Some(path) => {
                        info!("Server returned something, guess an update is available");
                        path
                    }
                    None => {
                        info!("Server returned nothing, guess we're up to date");
                        return Ok(());
                    }
                }
            }
        };

        debug!(path = ?update_file, "Parsing update file");
        let content = std::fs::read_to_string(&update_file)
            .with_context(|| format!("Failed to read update file {}", update_file.display()))?;
        let mut update = Update::from_json(&content)?;

        if update.is_empty() {
            warn!(path = ?update_file, "No update candidate, even though an update file exists");
            return Ok(());
        }
        update.minor.iter().chain(update.major.iter()).for_each(log_update);

        if options.estimate_download_size {
            update = self.estimate(update);
        }

        if options.query_only {
            if !self.quiet {
                println!("{}", update.to_string_pretty()?);
            }
            // Only the downloaded update file is ours to remove
            if options.update_file.is_none() {
                remove_if_exists(&update_file)?;
            }
            return Ok(());
        }

        let Some(candidate) = select_candidate(&update, options.update_version.as_ref())? else {
            debug!("No update");
            return Ok(());
        };

        let url = self.config.server.images_url.join(&candidate.update_path)?;
        info!(buildid = %candidate.image.buildid, url = %url, "Applying update");
        self.apply(url.as_str())
            .context("Failed to install update file")
    }

    /// Ask the server for the updates of `image`. `None` means up to date.
    pub fn query(&self, image: &Image) -> Result<Option<Update>, ClientError> {
        let url = &self.config.server.query_url;
        debug!(url = %url, image = %image, "Querying update server");

        let body = reqwest::blocking::Client::new()
            .get(url.clone())
            .query(&image.to_query())
            .send()?
            .error_for_status()?
            .text()?;

        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Update::from_json(&body)?))
    }

    /// Query the server and keep its answer in the update file, or remove a
    /// stale update file when there is nothing to install.
    pub fn fetch_update(&self, image: &Image) -> Result<Option<PathBuf>, ClientError> {
        let path = self.config.update_file();

        match self.query(image)? {
            Some(update) => {
                let mut file = NamedTempFile::new_in(&self.config.host.runtime_dir)?;
                file.write_all(update.to_string_pretty()?.as_bytes())?;
                file.persist(&path).map_err(|e| e.error)?;
                Ok(Some(path))
            }
            None => {
                remove_if_exists(&path)?;
                Ok(None)
            }
        }
    }

    /// Fill in missing download size estimates.
    pub fn estimate(&self, update: Update) -> Update {
        let estimator = self.estimator();
        Update::new(
            update.minor.map(|path| estimator.annotate(path)),
            update.major.map(|path| estimator.annotate(path)),
        )
    }

    /// Install the bundle at `url`.
    pub fn apply(&self, url: &str) -> Result<(), ClientError> {
        let desync = self.installer.uses_desync();
        if desync {
            // The index must match the active rootfs exactly
            self.estimator().rootfs_index(true)?;
        }

        let monitor = if self.quiet {
            None
        } else {
            ProgressMonitor::spawn(desync)
                .inspect_err(|error| warn!(error = %error, "Failed to follow the installer"))
                .ok()
        };

        let result = self.installer.install(url);
        if let Some(monitor) = monitor {
            monitor.finish(PROGRESS_GRACE);
        }
        result
    }
}
