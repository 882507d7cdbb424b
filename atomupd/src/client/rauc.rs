use super::ClientError;
use serde::Deserialize;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, warn};

/// Location of the RAUC system configuration.
pub const RAUC_SYSTEM_CONF: &str = "/etc/rauc/system.conf";

/// The tool that writes bundles to the inactive partition.
pub trait Installer {
    /// Install the bundle at `url`.
    fn install(&self, url: &str) -> Result<(), ClientError>;

    /// Block device of the booted rootfs slot.
    fn rootfs_device(&self) -> Result<PathBuf, ClientError>;

    /// Unpack the bundle at `url` into `destination`.
    fn extract(&self, url: &str, destination: &Path) -> Result<(), ClientError>;

    /// Whether bundles are fetched through the chunk-store tool.
    fn uses_desync(&self) -> bool;
}

/// [`Installer`] backed by the `rauc` command.
pub struct Rauc {
    system_conf: PathBuf,
}

impl Default for Rauc {
    fn default() -> Self {
        Self {
            system_conf: PathBuf::from(RAUC_SYSTEM_CONF),
        }
    }
}

impl Rauc {
    pub fn with_system_conf(path: impl Into<PathBuf>) -> Self {
        Self {
            system_conf: path.into(),
        }
    }
}

impl Installer for Rauc {
    fn install(&self, url: &str) -> Result<(), ClientError> {
        // The chunk downloads need plenty of space and inodes in /tmp, which
        // is only possible when it is a tmpfs
        if let Err(error) = run(Command::new("mount").args([
            "-o",
            "remount,size=100%,nr_inodes=1g",
            "/tmp",
            "/tmp",
        ])) {
            warn!(error = %error, "Failed to remount /tmp");
        }

        debug!(url, "Installing bundle");
        run(Command::new("rauc").arg("install").arg(url))?;
        Ok(())
    }

    fn rootfs_device(&self) -> Result<PathBuf, ClientError> {
        let output = run(Command::new("rauc").args(["status", "--output-format=json"]))?;
        parse_rootfs_device(&output)
    }

    fn extract(&self, url: &str, destination: &Path) -> Result<(), ClientError> {
        debug!(url, destination = ?destination, "Extracting bundle");
        run(Command::new("rauc").arg("extract").arg(url).arg(destination))?;
        Ok(())
    }

    fn uses_desync(&self) -> bool {
        match std::fs::read_to_string(&self.system_conf) {
            Ok(content) => desync_enabled(&content),
            Err(error) => {
                debug!(path = ?self.system_conf, error = %error, "No RAUC system configuration");
                false
            }
        }
    }
}

/// Run a command to completion and return its combined output, or fail with
/// its exit code.
pub(crate) fn run(command: &mut Command) -> Result<String, ClientError> {
    let output = command.output()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ClientError::Tool {
            program: command.get_program().to_string_lossy().into_owned(),
            code: output.status.code().unwrap_or(-1),
            output: text,
        });
    }
    Ok(text)
}

/// Remove a file, succeeding when it is already gone.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(error) if error.kind() != ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}

#[derive(Deserialize)]
struct RaucStatus {
    boot_primary: Option<String>,
    #[serde(default)]
    slots: Vec<HashMap<String, SlotStatus>>,
}

#[derive(Deserialize)]
struct SlotStatus {
    device: PathBuf,
}

/// Find the booted slot's device in `rauc status --output-format=json`.
fn parse_rootfs_device(status: &str) -> Result<PathBuf, ClientError> {
    let status: RaucStatus = serde_json::from_str(status)
        .map_err(|e| ClientError::InstallerStatus(e.to_string()))?;

    let boot_primary = status
        .boot_primary
        .filter(|slot| !slot.is_empty())
        .ok_or_else(|| ClientError::InstallerStatus(String::from("no booted slot")))?;

    status
        .slots
        .into_iter()
        .find_map(|mut slot| slot.remove(&boot_primary))
        .map(|slot| slot.device)
        .ok_or_else(|| ClientError::InstallerStatus(format!("no slot named '{boot_primary}'")))
}

/// Read `use-desync` from the `[casync]` section of an INI document.
fn desync_enabled(content: &str) -> bool {
    let mut in_casync = false;
    for line in content.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            in_casync = &line[1..line.len() - 1] == "casync";
            continue;
        }
        if !in_casync || line.starts_with(['#', ';']) {
            continue;
        }
        if let Some((key, value)) = line.split_once(['=', ':']) {
            if key.trim() == "use-desync" {
                return matches!(
                    value.trim().to_lowercase().as_str(),
                    "1" | "yes" | "true" | "on"
                );
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"{
        "compatible": "steamos-amd64",
        "booted": "A",
        "boot_primary": "rootfs.1",
        "slots": [
            {"rootfs.0": {"class": "rootfs", "device": "/dev/disk/by-partsets/A/rootfs", "state": "inactive"}},
            {"rootfs.1": {"class": "rootfs", "device": "/dev/disk/by-partsets/B/rootfs", "state": "booted"}}
        ]
    }"#;

    #[test]
    fn test_parse_rootfs_device() {
        assert_eq!(
            parse_rootfs_device(STATUS).unwrap(),
            Path::new("/dev/disk/by-partsets/B/rootfs")
        );
    }

    #[test]
    fn test_parse_rootfs_device_errors() {
        for status in [
            "",
            r#"{"boot_primary": null, "slots": []}"#,
            r#"{"boot_primary": "", "slots": []}"#,
            r#"{"boot_primary": "rootfs.2", "slots": [{"rootfs.0": {"device": "/dev/sda"}}]}"#,
        ] {
            assert!(
                matches!(parse_rootfs_device(status), Err(ClientError::InstallerStatus(_))),
                "Expected '{status}' to be rejected"
            );
        }
    }

    #[test]
    fn test_desync_enabled() {
        assert!(desync_enabled(
            "[system]\ncompatible=steamos\n\n[casync]\nuse-desync = true\n"
        ));
        assert!(desync_enabled("[casync]\nuse-desync=1\n"));
        assert!(!desync_enabled("[casync]\nuse-desync=false\n"));
        assert!(!desync_enabled("[casync]\n# use-desync=true\n"));
        assert!(!desync_enabled("[system]\nuse-desync=true\n"));
        assert!(!desync_enabled(""));
    }

    #[test]
    fn test_uses_desync_without_conf() {
        assert!(!Rauc::with_system_conf("/nonexistent/system.conf").uses_desync());
    }

    #[test]
    fn test_run_failure() {
        match run(Command::new("sh").args(["-c", "echo broken; exit 3"])) {
            Err(ClientError::Tool {
                program,
                code,
                output,
            }) => {
                assert_eq!(program, "sh");
                assert_eq!(code, 3);
                assert_eq!(output.trim(), "broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_remove_if_exists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("update.json");

        std::fs::write(&path, "{}").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());

        // Already gone
        remove_if_exists(&path).unwrap();

        // Directories are not ours to remove
        assert!(remove_if_exists(tmp.path()).is_err());
    }
}
