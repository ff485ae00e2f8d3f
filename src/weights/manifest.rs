//! Download manifests
//!
//! Each downloaded weight file gets a JSON sidecar recording where it came
//! from and its SHA-256, so a truncated or tampered file is caught on the
//! next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Sidecar written next to a downloaded weight file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub file: String,
    pub source_url: String,
    pub sha256: String,
    pub bytes: u64,
    pub downloaded_at: DateTime<Utc>,
}

impl Manifest {
    /// Path of the sidecar for `weights`: `x.pth` -> `x.pth.json`
    pub fn path_for(weights: &Path) -> PathBuf {
        let mut name = weights.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Describe `weights` as downloaded from `source_url` just now
    pub fn describe(weights: &Path, source_url: &str) -> Result<Self> {
        let bytes = std::fs::metadata(weights)?.len();
        Ok(Self {
            file: weights
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_url: source_url.to_string(),
            sha256: sha256_file(weights)?,
            bytes,
            downloaded_at: Utc::now(),
        })
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Whether `weights` still matches the recorded size and checksum
    pub fn matches(&self, weights: &Path) -> Result<bool> {
        if std::fs::metadata(weights)?.len() != self.bytes {
            return Ok(false);
        }
        Ok(sha256_file(weights)? == self.sha256)
    }
}

/// Hex SHA-256 of a file, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
