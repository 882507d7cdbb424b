use atomupd::pool::{ImagePool, PoolConfig, PoolError};
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Background jobs that can be requested while the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Scan the image tree again and serve the result
    Reload,

    /// Print the pool being served
    Dump,
}

struct Inner {
    config: PoolConfig,
    pool: Mutex<Arc<ImagePool>>,
    reloading: AtomicBool,
    dumping: AtomicBool,
}

/// State shared by every request: the pool being served.
///
/// The pool itself is immutable. A reload builds a new one without holding
/// the lock and only takes it to swap the reference.
#[derive(Clone)]
pub struct ServerState(Arc<Inner>);

/// Marks a job as in flight until dropped.
pub struct Busy {
    state: ServerState,
    command: AdminCommand,
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.state.flag(self.command).store(false, Ordering::Release);
    }
}

impl ServerState {
    /// Build the initial pool, which must succeed.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let pool = Self::load(&config)?;

        Ok(Self(Arc::new(Inner {
            config,
            pool: Mutex::new(Arc::new(pool)),
            reloading: AtomicBool::new(false),
            dumping: AtomicBool::new(false),
        })))
    }

    fn load(config: &PoolConfig) -> Result<ImagePool, PoolError> {
        info!("Creating the pool of images, this may take a while...");
        let start = Instant::now();

        let pool = ImagePool::new(config.clone())?;
        let report = pool.report();
        info!(
            elapsed = ?start.elapsed(),
            loaded = report.loaded,
            skipped = report.skipped,
            "Image pool created",
        );
        Ok(pool)
    }

    /// The pool currently being served.
    pub fn pool(&self) -> Arc<ImagePool> {
        self.0
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn flag(&self, command: AdminCommand) -> &AtomicBool {
        match command {
            AdminCommand::Reload => &self.0.reloading,
            AdminCommand::Dump => &self.0.dumping,
        }
    }

    /// Claim `command`, unless it is already in flight.
    pub fn try_begin(&self, command: AdminCommand) -> Option<Busy> {
        if self.flag(command).swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Busy {
            state: self.clone(),
            command,
        })
    }

    /// Run `command` on a blocking worker. Returns `None` when the same
    /// command is already running, in which case this request is dropped.
    pub fn trigger(&self, command: AdminCommand) -> Option<JoinHandle<()>> {
        let Some(busy) = self.try_begin(command) else {
            debug!(?command, "Already in flight, ignoring");
            return None;
        };

        let state = self.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _busy = busy;
            match command {
                AdminCommand::Reload => {
                    if let Err(error) = state.reload() {
                        error!(error = %error, "Failed to reload the image pool, keeping the current one");
                    }
                }
                AdminCommand::Dump => state.dump(),
            }
        }))
    }

    /// Scan the image tree and start serving the new pool, then dump it.
    pub fn reload(&self) -> Result<(), PoolError> {
        let pool = Arc::new(Self::load(&self.0.config)?);

        *self
            .0
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = pool;

        self.dump();
        Ok(())
    }

    /// Print the pool being served.
    pub fn dump(&self) {
        let pool = self.pool();
        println!("--- Image Pool ---\n{pool}------------------");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use atomupd::pool::{BUNDLE_SUFFIX, CHUNK_STORE_SUFFIX};
    use atomupd_image::{Image, MANIFEST_SUFFIX, Manifest};
    use std::{fs, path::Path};
    use tempfile::TempDir;

    pub(crate) fn add_image(dir: &Path, version: &str, buildid: &str) {
        let image = Image::from_values(
            "steamos", "clockwerk", "atomic", "amd64", version, buildid, false, 0,
        )
        .unwrap();
        let name = format!("steamos-{version}");

        Manifest::new(image)
            .write(dir.join(format!("{name}{MANIFEST_SUFFIX}")))
            .unwrap();
        fs::write(dir.join(format!("{name}{BUNDLE_SUFFIX}")), b"bundle").unwrap();
        fs::create_dir_all(dir.join(format!("{name}{CHUNK_STORE_SUFFIX}"))).unwrap();
    }

    pub(crate) fn pool_config(dir: &Path) -> PoolConfig {
        PoolConfig {
            pool_dir: dir.to_path_buf(),
            snapshots: false,
            unstable: false,
            products: vec![String::from("steamos")],
            releases: vec![String::from("clockwerk")],
            variants: vec![String::from("atomic")],
            archs: vec![String::from("amd64")],
        }
    }

    #[test]
    fn test_initial_load_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            ServerState::new(pool_config(&tmp.path().join("missing"))),
            Err(PoolError::MissingDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_pool() {
        let tmp = TempDir::new().unwrap();
        add_image(tmp.path(), "3.1.0", "20200101");

        let state = ServerState::new(pool_config(tmp.path())).unwrap();
        let before = state.pool();
        assert_eq!(before.report().loaded, 1);

        add_image(tmp.path(), "3.2.0", "20200201");
        state
            .trigger(AdminCommand::Reload)
            .unwrap()
            .await
            .unwrap();

        // Readers holding the old pool keep a consistent view
        assert_eq!(before.report().loaded, 1);
        assert_eq!(state.pool().report().loaded, 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_pool() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("pool");
        fs::create_dir(&dir).unwrap();
        add_image(&dir, "3.1.0", "20200101");

        let state = ServerState::new(pool_config(&dir)).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        state
            .trigger(AdminCommand::Reload)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(state.pool().report().loaded, 1);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let tmp = TempDir::new().unwrap();
        let state = ServerState::new(pool_config(tmp.path())).unwrap();

        let busy = state.try_begin(AdminCommand::Reload).unwrap();
        assert!(state.trigger(AdminCommand::Reload).is_none());

        // Jobs of another kind are independent
        state.trigger(AdminCommand::Dump).unwrap().await.unwrap();

        drop(busy);
        state
            .trigger(AdminCommand::Reload)
            .unwrap()
            .await
            .unwrap();

        // The flag is released once the job is done
        assert!(state.try_begin(AdminCommand::Reload).is_some());
    }
}
