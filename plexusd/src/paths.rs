//! Where the daemon keeps its files.
//!
//! - Linux: ~/.local/share/plexus/
//! - Windows: %APPDATA%\plexus\
//! - MacOS: ~/Library/Application Support/plexus/

use std::path::{Path, PathBuf};

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let data_dir = dirs::data_dir().ok_or(DaemonError::NoDataDir)?.join("plexus");
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    #[cfg(test)]
    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn network_file(&self) -> PathBuf {
        self.data_dir.join("network.plx")
    }

    pub fn vocab_file(&self) -> PathBuf {
        self.data_dir.join("vocab.json")
    }
}
