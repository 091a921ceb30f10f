//! PID file handling.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A written PID file, removed again when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`, replacing any previous content.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::create_with_pid(path, std::process::id())
    }

    fn create_with_pid(path: impl Into<PathBuf>, pid: u32) -> io::Result<Self> {
        let path = path.into();
        fs::write(&path, format!("{pid}\n"))?;
        debug!("wrote pid {pid} to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed pid file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove pid file {}: {e}", self.path.display()),
        }
    }
}
