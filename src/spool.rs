use crate::config::Config;
use anyhow::Context;
use std::fs::{DirBuilder, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

pub const HEADERS: &str = "HEADERS";
pub const INPUTMSG: &str = "INPUTMSG";
pub const COMMANDS: &str = "COMMANDS";
pub const RESULTS: &str = "RESULTS";
pub const NEWBODY: &str = "NEWBODY";

/// Owns the per-message working directories under the spool root.
#[derive(Debug, Clone)]
pub struct Spool {
    root: PathBuf,
    keep: bool,
}

/// Handle to one `mdefang-<id>` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolDir {
    id: String,
    path: PathBuf,
}

impl Spool {
    pub fn new(config: &Config) -> Self {
        Spool {
            root: config.spool_dir.clone(),
            keep: config.keep_spool,
        }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("mdefang-{id}"))
    }

    pub fn open(&self, id: &str) -> anyhow::Result<SpoolDir> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            anyhow::bail!("refusing spool directory for message id {id:?}");
        }

        let path = self.path_for(id);
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&path)
            .with_context(|| format!("creating spool directory {}", path.display()))?;

        // A kept or abandoned directory may hold a previous scan's output.
        for name in [RESULTS, NEWBODY] {
            let stale = path.join(name);
            match std::fs::remove_file(&stale) {
                Ok(()) => log::debug!("Removed stale {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing stale {}", stale.display()))
                }
            }
        }
        log::debug!("Opened spool directory {}", path.display());

        Ok(SpoolDir {
            id: id.to_string(),
            path,
        })
    }

    /// Best-effort removal. Missing directories and removal errors are ignored.
    pub fn remove(&self, id: &str) {
        let path = self.path_for(id);
        if self.keep {
            log::debug!("Keeping spool directory {}", path.display());
            return;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => log::debug!("Removed spool directory {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("Ignoring failure to remove {}: {e}", path.display()),
        }
    }
}

impl SpoolDir {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Write `lines` to `name`, each terminated by a newline.
    pub fn write_lines<I, S>(&self, name: &str, lines: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = self.file(name);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for line in lines {
            out.write_all(line.as_ref().as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Read `name` if the scanner produced it.
    pub fn read_optional(&self, name: &str) -> anyhow::Result<Option<String>> {
        let path = self.file(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}
