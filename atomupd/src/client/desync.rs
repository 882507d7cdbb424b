use super::{
    ClientError,
    rauc::{Installer, remove_if_exists, run},
};
use atomupd_image::{BuildId, UpdatePath};
use std::{
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, warn};
use url::Url;

/// Chunk index shipped inside an extracted bundle.
pub const UPDATE_INDEX: &str = "rootfs.img.caibx";

/// Chunk index of the active rootfs, relative to the runtime dir.
pub const ROOTFS_INDEX: &str = "rootfs.caibx";

/// The content-addressable chunk-store tool.
pub trait ChunkStore {
    /// Index the chunks of `source` into `index`.
    fn make_index(&self, index: &Path, source: &Path) -> Result<(), ClientError>;

    /// Bytes of `index` that are not already available in `seed`.
    fn info(&self, seed: &Path, index: &Path) -> Result<u64, ClientError>;
}

/// [`ChunkStore`] backed by the `desync` command.
#[derive(Default)]
pub struct Desync;

impl ChunkStore for Desync {
    fn make_index(&self, index: &Path, source: &Path) -> Result<(), ClientError> {
        run(Command::new("desync").arg("make").arg(index).arg(source))?;
        Ok(())
    }

    fn info(&self, seed: &Path, index: &Path) -> Result<u64, ClientError> {
        let output = run(Command::new("desync")
            .arg("info")
            .arg("--seed")
            .arg(seed)
            .arg(index))?;
        parse_dedup_size(&output)
    }
}

fn parse_dedup_size(info: &str) -> Result<u64, ClientError> {
    let info: serde_json::Value =
        serde_json::from_str(info).map_err(|e| ClientError::Estimation(e.to_string()))?;

    Ok(info
        .get("dedup-size-not-in-seed")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0))
}

/// Works out how much each hop of an update path would download.
pub struct SizeEstimator<'a> {
    pub runtime_dir: &'a Path,
    pub images_url: &'a Url,
    pub installer: &'a dyn Installer,
    pub chunk_store: &'a dyn ChunkStore,
}

impl SizeEstimator<'_> {
    /// Index the active rootfs into the runtime dir, next to a `rootfs`
    /// symlink to its device. An existing index is kept unless `replace`.
    pub fn rootfs_index(&self, replace: bool) -> Result<PathBuf, ClientError> {
        let index = self.runtime_dir.join(ROOTFS_INDEX);
        if index.exists() && !replace {
            return Ok(index);
        }
        remove_if_exists(&index)?;

        let device = self.installer.rootfs_device()?;
        debug!(device = ?device, index = ?index, "Indexing the active rootfs");
        self.chunk_store.make_index(&index, &device)?;

        // The extract step finds the seed data next to its index
        let link = self.runtime_dir.join("rootfs");
        remove_if_exists(&link)?;
        std::os::unix::fs::symlink(&device, &link)?;

        Ok(index)
    }

    /// Estimate the download size of one bundle, seeded by the bundle of
    /// `base` or by the active rootfs when there is no base.
    pub fn estimate(
        &self,
        update_path: &str,
        buildid: &BuildId,
        base: Option<&BuildId>,
    ) -> Result<u64, ClientError> {
        let url = self.images_url.join(update_path)?;

        let destination = self.runtime_dir.join(buildid.to_string());
        if !destination.exists() {
            self.installer.extract(url.as_str(), &destination)?;
        }

        let index = destination.join(UPDATE_INDEX);
        if !index.exists() {
            return Err(ClientError::Estimation(format!(
                "the extracted bundle has no '{UPDATE_INDEX}'"
            )));
        }

        let seed = match base {
            Some(base) => {
                let seed = self.runtime_dir.join(base.to_string()).join(UPDATE_INDEX);
                if !seed.exists() {
                    return Err(ClientError::Estimation(format!(
                        "the bundle of the required base image {base} is missing"
                    )));
                }
                seed
            }
            None => self.rootfs_index(false)?,
        };

        self.chunk_store.info(&seed, &index)
    }

    /// Fill in the estimated size of every candidate that lacks one. Each hop
    /// is seeded by the hop before it. Failures leave the estimate at zero.
    pub fn annotate(&self, path: UpdatePath) -> UpdatePath {
        if !self.installer.uses_desync() {
            debug!("Chunk store not in use, skipping download size estimation");
            return path;
        }

        let mut base: Option<BuildId> = None;
        path.map_images(|candidate| {
            let mut image = candidate.image.clone();
            if image.estimated_size == 0 {
                image.estimated_size =
                    match self.estimate(&candidate.update_path, &image.buildid, base.as_ref()) {
                        Ok(size) => size,
                        Err(error) => {
                            warn!(buildid = %image.buildid, error = %error, "Failed to estimate the download size");
                            0
                        }
                    };
            }
            base = Some(image.buildid);
            image
        })
    }
}
