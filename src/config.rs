//! Runtime configuration
//!
//! Defaults, then an optional JSON file, then `REVIVIA_*` environment
//! variables on top.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::DEFAULT_ENGINE_CACHE_CAPACITY;
use crate::error::Result;

/// Directory the weights land in when nothing else is configured
pub const DEFAULT_WEIGHTS_DIR: &str = "realesrgan_weights";

/// Configuration shared by the weight cache and the engine backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where downloaded weight files are cached
    pub weights_dir: PathBuf,
    /// Upper bound for a single weight download
    pub download_timeout_secs: u64,
    /// Base URL of the HTTP inference bridge
    pub bridge_url: String,
    /// Upper bound for a single bridge call
    pub bridge_timeout_ms: u64,
    /// Reuse constructed networks across requests
    pub cache_engines: bool,
    /// How many constructed networks to keep
    pub engine_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from(DEFAULT_WEIGHTS_DIR),
            download_timeout_secs: 600,
            bridge_url: "http://localhost:8002".to_string(),
            bridge_timeout_ms: 300_000, // 5 minutes
            cache_engines: true,
            engine_cache_capacity: DEFAULT_ENGINE_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a JSON file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = env::var("REVIVIA_WEIGHTS_DIR") {
            self.weights_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_env("REVIVIA_DOWNLOAD_TIMEOUT_SECS") {
            self.download_timeout_secs = secs;
        }
        if let Ok(url) = env::var("REVIVIA_BRIDGE_URL") {
            self.bridge_url = url;
        }
        if let Some(ms) = parse_env("REVIVIA_BRIDGE_TIMEOUT_MS") {
            self.bridge_timeout_ms = ms;
        }
        if let Some(capacity) = parse_env("REVIVIA_ENGINE_CACHE_CAPACITY") {
            self.engine_cache_capacity = capacity as usize;
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn with_weights_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.weights_dir = dir.into();
        self
    }
}

fn parse_env(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
