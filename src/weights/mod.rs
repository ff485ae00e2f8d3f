//! Weight cache
//!
//! Resolves model identifiers to local weight files, downloading on first
//! use. One file per identifier under the cache directory:
//!
//! ```text
//! realesrgan_weights/
//!   RealESRGAN_x4plus.pth
//!   RealESRGAN_x4plus.pth.json      (download manifest)
//!   realesr-general-x4v3.pth
//!   realesr-general-wdn-x4v3.pth    (denoise companion)
//!   GFPGANv1.3.pth                  (face restoration)
//! ```
//!
//! Concurrent resolutions of the same file converge on one download.

mod fetch;
mod manifest;

pub use fetch::{FetchError, HttpFetcher, WeightFetcher};
pub use manifest::{sha256_file, Manifest};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, RevivError};
use crate::registry::ModelDescriptor;

/// GFPGAN weights used by the face-restoration pass
pub const FACE_WEIGHTS_FILE: &str = "GFPGANv1.3.pth";
pub const FACE_WEIGHTS_URL: &str =
    "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.3.pth";
const FACE_WEIGHTS_MODEL: &str = "GFPGANv1.3";

/// Weight files ready for engine construction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedWeights {
    pub primary: PathBuf,
    /// Weighted-denoise variant, present only when blending
    pub companion: Option<PathBuf>,
    /// `[denoise_strength, 1 - denoise_strength]`, present only when blending
    pub blend: Option<[f32; 2]>,
}

impl ResolvedWeights {
    pub fn single(primary: PathBuf) -> Self {
        Self {
            primary,
            companion: None,
            blend: None,
        }
    }

    /// All weight files, primary first
    pub fn paths(&self) -> Vec<&Path> {
        std::iter::once(self.primary.as_path())
            .chain(self.companion.as_deref())
            .collect()
    }
}

/// Blend coefficients for a denoise strength; `None` means pass-through.
pub fn blend_coefficients(denoise_strength: f32) -> Option<[f32; 2]> {
    if denoise_strength == 1.0 {
        None
    } else {
        Some([denoise_strength, 1.0 - denoise_strength])
    }
}

/// A weight file found in the cache directory
#[derive(Debug, Clone, Serialize)]
pub struct CachedWeights {
    pub path: PathBuf,
    pub bytes: u64,
    pub manifest: Option<Manifest>,
}

/// Identifier-keyed cache of weight files on the local filesystem
pub struct WeightCache {
    dir: PathBuf,
    fetcher: Arc<dyn WeightFetcher>,
    /// One gate per file name; held for the whole download
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Files whose manifest checksum was confirmed during this process
    verified: Mutex<HashSet<PathBuf>>,
}

impl WeightCache {
    pub fn new(dir: impl Into<PathBuf>, fetcher: Arc<dyn WeightFetcher>) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
            gates: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `file_name` lives once cached
    pub fn expected_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Resolve the weights for one request.
    ///
    /// A caller-supplied `model_path` is used verbatim. The denoise
    /// companion is resolved only for models that have one, and only when
    /// `denoise_strength != 1`.
    pub fn resolve(
        &self,
        descriptor: &ModelDescriptor,
        model_path: Option<&Path>,
        denoise_strength: f32,
    ) -> Result<ResolvedWeights> {
        let primary = match model_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(RevivError::WeightsUnavailable {
                        model: descriptor.identifier().to_string(),
                        attempts: vec![format!("{}: no such file", path.display())],
                    });
                }
                debug!(path = %path.display(), "using caller-supplied weights");
                path.to_path_buf()
            }
            None => self.ensure_file(
                descriptor.identifier(),
                &descriptor.weights_file_name(),
                descriptor.weight_urls,
            )?,
        };

        let (companion, blend) = match (descriptor.denoise_companion, blend_coefficients(denoise_strength)) {
            (Some(companion), Some(blend)) => {
                let sibling = model_path
                    .and_then(|p| sibling_path(p, descriptor.identifier(), companion.identifier))
                    .filter(|p| p.is_file());
                let path = match sibling {
                    Some(path) => path,
                    None => self.ensure_file(
                        companion.identifier,
                        &format!("{}.pth", companion.identifier),
                        companion.weight_urls,
                    )?,
                };
                debug!(companion = %path.display(), ?blend, "denoise blend enabled");
                (Some(path), Some(blend))
            }
            _ => (None, None),
        };

        Ok(ResolvedWeights {
            primary,
            companion,
            blend,
        })
    }

    /// Resolve the face-restoration weights from their single source
    pub fn resolve_face_weights(&self) -> Result<PathBuf> {
        self.ensure_file(FACE_WEIGHTS_MODEL, FACE_WEIGHTS_FILE, &[FACE_WEIGHTS_URL])
    }

    /// Return the cached `file_name`, downloading it from `urls` (tried in
    /// order) when missing or corrupted.
    ///
    /// # Errors
    /// * `WeightsUnavailable` - every source failed
    pub fn ensure_file(&self, model: &str, file_name: &str, urls: &[&str]) -> Result<PathBuf> {
        let path = self.expected_path(file_name);
        if self.is_intact(&path)? {
            debug!(model, path = %path.display(), "weights cache hit");
            return Ok(path);
        }

        let gate = self.gate(file_name);
        let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished the download while we waited.
        if self.is_intact(&path)? {
            debug!(model, path = %path.display(), "weights downloaded by concurrent request");
            return Ok(path);
        }

        std::fs::create_dir_all(&self.dir)?;
        let partial = self.expected_path(&format!("{}.part", file_name));
        let mut attempts = Vec::new();

        for url in urls {
            info!(model, url, "downloading weights");
            let outcome = self
                .fetcher
                .fetch(url, &partial)
                .map_err(|e| e.to_string())
                .and_then(|()| self.install(&partial, &path, url).map_err(|e| e.to_string()));

            match outcome {
                Ok(()) => {
                    info!(model, path = %path.display(), "weights installed");
                    return Ok(path);
                }
                Err(reason) => {
                    warn!(model, url, %reason, "weight download failed");
                    let _ = std::fs::remove_file(&partial);
                    attempts.push(format!("{}: {}", url, reason));
                }
            }
        }

        Err(RevivError::WeightsUnavailable {
            model: model.to_string(),
            attempts,
        })
    }

    /// Weight files currently in the cache directory
    pub fn cached_files(&self) -> Result<Vec<CachedWeights>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let path = entry.path();
            if path.extension().map(|e| e == "pth").unwrap_or(false) {
                files.push(CachedWeights {
                    path: path.to_path_buf(),
                    bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
                    manifest: Manifest::load(&Manifest::path_for(path)).ok().flatten(),
                });
            }
        }
        Ok(files)
    }

    fn gate(&self, file_name: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Present, non-empty, and matching its manifest if it has one.
    /// Manually placed files without a manifest are trusted.
    fn is_intact(&self, path: &Path) -> Result<bool> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() || metadata.len() == 0 {
            return Ok(false);
        }

        if self.is_verified(path) {
            return Ok(true);
        }
        match Manifest::load(&Manifest::path_for(path)) {
            Ok(None) => Ok(true),
            Ok(Some(manifest)) => {
                if manifest.matches(path)? {
                    self.mark_verified(path);
                    Ok(true)
                } else {
                    warn!(path = %path.display(), "cached weights do not match manifest, re-downloading");
                    Ok(false)
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable manifest, re-downloading");
                Ok(false)
            }
        }
    }

    /// Move a finished download into place and record its manifest
    fn install(&self, partial: &Path, path: &Path, url: &str) -> Result<()> {
        let bytes = std::fs::metadata(partial)?.len();
        if bytes == 0 {
            return Err(RevivError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "empty download",
            )));
        }
        let manifest = Manifest::describe(partial, url)?;
        std::fs::rename(partial, path)?;
        Manifest {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..manifest
        }
        .save(&Manifest::path_for(path))?;
        self.mark_verified(path);
        Ok(())
    }

    fn is_verified(&self, path: &Path) -> bool {
        self.verified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    fn mark_verified(&self, path: &Path) {
        self.verified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
    }
}

/// `dir/realesr-general-x4v3.pth` -> `dir/realesr-general-wdn-x4v3.pth`
fn sibling_path(path: &Path, identifier: &str, companion: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    if !name.contains(identifier) {
        return None;
    }
    Some(path.with_file_name(name.replace(identifier, companion)))
}
