use std::{
    io::{BufRead, BufReader, Write},
    path::Path,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::debug;

/// What a line of installer log means for the progress display.
#[derive(Debug, PartialEq)]
pub enum Progress {
    /// Print this
    Report(String),

    /// The installation is over
    Done,

    /// Nothing to show
    Ignore,
}

/// Turns the installer's log into percentages.
///
/// With the chunk-store tool the installer prints its own percentages, which
/// are passed through. Otherwise seeding the rootfs maps to 5-27% and
/// downloading its chunks to 27-95%.
pub struct ProgressParser {
    desync: bool,
    slot: String,
}

fn percent(word: &str) -> Option<f64> {
    word.strip_suffix('%')?.parse().ok()
}

impl ProgressParser {
    pub fn new(desync: bool) -> Self {
        Self {
            desync,
            slot: String::new(),
        }
    }

    pub fn parse(&mut self, line: &str) -> Progress {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = words.first() else {
            return Progress::Ignore;
        };

        if *first == "installing" && words.len() > 2 {
            match words[2] {
                "started" => return Progress::Report(String::from("0%")),
                "finished" => return Progress::Report(String::from("100%")),
                "succeeded" | "failed:" => return Progress::Done,
                _ => {}
            }
        }

        if self.desync {
            if first.ends_with('%') && words.len() < 3 {
                return Progress::Report(line.to_string());
            }
            return Progress::Ignore;
        }

        if *first == "Slot" {
            // Slot names come from the image file, e.g. 'rootfs.img.caibx'
            if let Some(image) = words.get(6) {
                let image = image.trim_matches('\'');
                let stem = Path::new(image).file_stem().map(Path::new);
                self.slot = stem
                    .and_then(Path::file_stem)
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
            return Progress::Ignore;
        }

        let (last, head) = words.split_last().unwrap_or((first, &[]));
        let head = head.join(" ");

        if self.slot == "rootfs" {
            if let Some(pct) = percent(last) {
                if head == "seeding..." {
                    return Progress::Report(format!("{}%", (pct * 25.0 * 0.9 / 100.0 + 5.0) as i64));
                }
                if head == "downloading chunks..." {
                    return Progress::Report(format!(
                        "{}%",
                        (pct * 75.0 * 0.9 / 100.0 + 5.0 + 25.0 * 0.9) as i64
                    ));
                }
            }
        }

        if *first == "installing" && words.len() > 2 && words[2..].join(" ") == "All slots updated" {
            return Progress::Report(String::from("95%"));
        }

        Progress::Ignore
    }
}

/// Follows the installer journal and prints progress on stdout until the
/// installation ends.
pub struct ProgressMonitor {
    journal: Child,
    reader: JoinHandle<()>,
}

impl ProgressMonitor {
    pub fn spawn(desync: bool) -> std::io::Result<Self> {
        let mut journal = Command::new("journalctl")
            .args([
                "--unit=rauc.service",
                "--since=now",
                "--output=cat",
                "--follow",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = journal
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("journalctl has no output"))?;

        let reader = thread::spawn(move || {
            let mut parser = ProgressParser::new(desync);
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else {
                    break;
                };
                debug!(line = %line, "Installer log");

                match parser.parse(&line) {
                    Progress::Report(text) => {
                        println!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    Progress::Done => break,
                    Progress::Ignore => {}
                }
            }
        });

        Ok(Self { journal, reader })
    }

    /// Give the monitor `grace` to see the end of the installation, then stop
    /// following the journal.
    pub fn finish(mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }

        if let Err(error) = self.journal.kill() {
            debug!(error = %error, "Failed to stop following the journal");
        }
        let _ = self.journal.wait();
        let _ = self.reader.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(text: &str) -> Progress {
        Progress::Report(text.to_string())
    }

    #[test]
    fn test_install_lifecycle() {
        let mut parser = ProgressParser::new(false);

        assert_eq!(parser.parse(""), Progress::Ignore);
        assert_eq!(parser.parse("installing `/tmp/x.raucb`: started"), report("0%"));
        assert_eq!(parser.parse("installing `/tmp/x.raucb`: finished"), report("100%"));
        assert_eq!(parser.parse("installing `/tmp/x.raucb`: succeeded"), Progress::Done);
        assert_eq!(
            parser.parse("installing `/tmp/x.raucb`: failed: no space left"),
            Progress::Done
        );
    }

    #[test]
    fn test_rootfs_progress() {
        let mut parser = ProgressParser::new(false);

        // Before the rootfs slot is known, percentages are meaningless
        assert_eq!(parser.parse("seeding... 50%"), Progress::Ignore);

        assert_eq!(
            parser.parse("Slot 'rootfs.1' will be updated from /tmp/bundle/rootfs.img.caibx"),
            Progress::Ignore
        );
        assert_eq!(parser.parse("seeding... 0%"), report("5%"));
        assert_eq!(parser.parse("seeding... 100%"), report("27%"));
        assert_eq!(parser.parse("downloading chunks... 0%"), report("27%"));
        assert_eq!(parser.parse("downloading chunks... 50%"), report("61%"));
        assert_eq!(parser.parse("downloading chunks... 100%"), report("95%"));
        assert_eq!(parser.parse("installing `/tmp/x.raucb`: All slots updated"), report("95%"));
    }

    #[test]
    fn test_other_slot_ignored() {
        let mut parser = ProgressParser::new(false);

        parser.parse("Slot 'efi.1' will be updated from /tmp/bundle/efi.img.caibx");
        assert_eq!(parser.parse("seeding... 50%"), Progress::Ignore);
        assert_eq!(parser.parse("downloading chunks... 50%"), Progress::Ignore);
    }

    #[test]
    fn test_desync_passthrough() {
        let mut parser = ProgressParser::new(true);

        assert_eq!(parser.parse("  42% "), report("42%"));
        assert_eq!(parser.parse("42% 1.2MB/s"), report("42% 1.2MB/s"));
        assert_eq!(parser.parse("42% of something"), Progress::Ignore);
        assert_eq!(parser.parse("seeding... 50%"), Progress::Ignore);
        assert_eq!(parser.parse("installing `/tmp/x.raucb`: started"), report("0%"));
    }
}
