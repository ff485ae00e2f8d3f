//! Inference dispatcher
//!
//! Turns an [`InferenceRequest`] into a [`Restored`] image: model lookup,
//! weight resolution, engine construction (cached), optional face
//! enhancement and the forward pass under the device lock.

mod cache;
mod request;

pub use cache::DEFAULT_ENGINE_CACHE_CAPACITY;
pub use request::{EncodedOutput, InferenceOptions, InferenceRequest, Restored, MAX_OUTPUT_PIXELS};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::config::Config;
use crate::engine::face::SharedFaceRestorer;
use crate::engine::{
    DeviceSelector, EngineBackend, EngineFailure, EngineKey, EngineSpec, Enhancer, FaceEnhancer,
    SharedNetwork, TilingConfig, Upsampler,
};
use crate::error::{Result, RevivError};
use crate::imaging::{decode_image, encode_image, upscaled_file_name};
use crate::registry::ModelFamily;
use crate::weights::{HttpFetcher, WeightCache};
use cache::LruCache;

/// Tile size suggested when an untiled pass runs out of memory
pub const FALLBACK_TILE: u32 = 400;

/// Shared entry point for restorations; `Send + Sync`.
pub struct Dispatcher {
    weights: WeightCache,
    backend: Arc<dyn EngineBackend>,
    cache_engines: bool,
    /// Bounded: every distinct denoise strength is a separate network
    networks: Mutex<LruCache<EngineKey, SharedNetwork>>,
    face_restorers: Mutex<LruCache<(PathBuf, DeviceSelector), SharedFaceRestorer>>,
    /// One lock per device; held for the whole forward pass
    devices: Mutex<HashMap<DeviceSelector, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(weights: WeightCache, backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            weights,
            backend,
            cache_engines: true,
            networks: Mutex::new(LruCache::new(DEFAULT_ENGINE_CACHE_CAPACITY)),
            face_restorers: Mutex::new(LruCache::new(DEFAULT_ENGINE_CACHE_CAPACITY)),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Weight cache downloading over HTTP, as configured
    pub fn from_config(config: &Config, backend: Arc<dyn EngineBackend>) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(config.download_timeout()));
        let weights = WeightCache::new(config.weights_dir.clone(), fetcher);
        Self::new(weights, backend)
            .with_engine_cache(config.cache_engines)
            .with_engine_cache_capacity(config.engine_cache_capacity)
    }

    pub fn with_engine_cache(mut self, enabled: bool) -> Self {
        self.cache_engines = enabled;
        self
    }

    /// Keep at most `capacity` networks (and face restorers); the least
    /// recently used are dropped first.
    pub fn with_engine_cache_capacity(mut self, capacity: usize) -> Self {
        self.networks = Mutex::new(LruCache::new(capacity));
        self.face_restorers = Mutex::new(LruCache::new(capacity));
        self
    }

    pub fn weights(&self) -> &WeightCache {
        &self.weights
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Number of networks currently cached
    pub fn cached_engines(&self) -> usize {
        self.networks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Restore one image.
    ///
    /// Family, model and option checks happen before any filesystem or
    /// network access.
    ///
    /// # Errors
    /// * `NotImplemented` - the family has no dispatch path
    /// * `UnknownModel` - the identifier is not in the registry
    /// * `InvalidParameter` - an option is out of range, or the output
    ///   would exceed [`MAX_OUTPUT_PIXELS`]
    /// * `WeightsUnavailable` - weights missing and every source failed
    /// * `ResourceExhausted` - the device ran out of memory; retry with a
    ///   smaller tile
    pub fn restore(&self, request: InferenceRequest) -> Result<Restored> {
        let InferenceRequest {
            id,
            family,
            model,
            image,
            options,
        } = request;
        let span = info_span!("restore", request_id = %id, model = %model);
        let _enter = span.enter();
        let start = Instant::now();

        let descriptor = family.resolve(&model)?;
        options.validate()?;
        options.check_output_size(image.width(), image.height(), descriptor.native_scale)?;

        let weights = self.weights.resolve(
            descriptor,
            options.model_path.as_deref(),
            options.denoise_strength,
        )?;
        let spec = EngineSpec {
            descriptor,
            weights,
            precision: options.precision,
            device: options.device,
        };

        let upsampler = Upsampler::new(self.network(&spec)?, descriptor.native_scale, options.tiling);
        let mut enhancer: Box<dyn Enhancer> = if options.face_enhance {
            Box::new(FaceEnhancer::new(self.face_restorer(options.device)?, upsampler))
        } else {
            Box::new(upsampler)
        };

        let device = self.device_lock(options.device);
        let outcome = {
            let _guard = device.lock().unwrap_or_else(PoisonError::into_inner);
            debug!(device = %options.device, width = image.width(), height = image.height(), "forward pass");
            enhancer.enhance(&image, options.outscale)
        };
        let output = outcome.map_err(|failure| {
            warn!(%failure, "forward pass failed");
            classify_failure(failure, &options.tiling)
        })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(elapsed_ms, width = output.width(), height = output.height(), "restore complete");
        Ok(Restored {
            image: output,
            model: descriptor.id,
            outscale: options.outscale,
            elapsed_ms,
        })
    }

    /// Decode an upload, restore it and encode the result in the upload's
    /// container, named `<stem>-upscaled.<ext>`.
    pub fn restore_encoded(
        &self,
        bytes: &[u8],
        file_name: &str,
        family: ModelFamily,
        model: &str,
        options: InferenceOptions,
    ) -> Result<EncodedOutput> {
        let decoded = decode_image(bytes)?;
        let request = InferenceRequest::new(model, decoded.buffer)
            .with_family(family)
            .with_options(options);
        let restored = self.restore(request)?;

        Ok(EncodedOutput {
            bytes: encode_image(&restored.image, decoded.format)?,
            file_name: upscaled_file_name(file_name, decoded.format),
            format: decoded.format,
            dimensions: restored.image.dimensions(),
            elapsed_ms: restored.elapsed_ms,
        })
    }

    fn network(&self, spec: &EngineSpec) -> Result<SharedNetwork> {
        let key = spec.cache_key();
        if self.cache_engines {
            let mut networks = self.networks.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(network) = networks.get(&key) {
                debug!("engine cache hit");
                return Ok(network);
            }
        }

        info!(backend = self.backend.name(), model = spec.descriptor.identifier(), "building network");
        let network: SharedNetwork = Arc::new(Mutex::new(self.backend.build_network(spec)?));
        if !self.cache_engines {
            return Ok(network);
        }

        // Keep whichever network reached the cache first.
        let mut networks = self.networks.lock().unwrap_or_else(PoisonError::into_inner);
        let (network, evicted) = networks.get_or_insert(key, network);
        if evicted > 0 {
            debug!(evicted, "evicted least recently used networks");
        }
        Ok(network)
    }

    fn face_restorer(&self, device: DeviceSelector) -> Result<SharedFaceRestorer> {
        let weights = self.weights.resolve_face_weights()?;
        let key = (weights.clone(), device);
        if self.cache_engines {
            let mut restorers = self.face_restorers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(restorer) = restorers.get(&key) {
                return Ok(restorer);
            }
        }

        info!(backend = self.backend.name(), "building face restorer");
        let restorer: SharedFaceRestorer =
            Arc::new(Mutex::new(self.backend.build_face_restorer(&weights, device)?));
        if !self.cache_engines {
            return Ok(restorer);
        }
        let mut restorers = self.face_restorers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(restorers.get_or_insert(key, restorer).0)
    }

    fn device_lock(&self, device: DeviceSelector) -> Arc<Mutex<()>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Tile size to suggest after running out of memory with `tiling`
pub fn suggested_tile(tiling: &TilingConfig) -> u32 {
    if tiling.is_tiled() {
        (tiling.tile / 2).max(1)
    } else {
        FALLBACK_TILE
    }
}

fn classify_failure(failure: EngineFailure, tiling: &TilingConfig) -> RevivError {
    match failure {
        EngineFailure::OutOfMemory(details) => {
            let tile = suggested_tile(tiling);
            let hint = if tiling.is_tiled() {
                format!("Retry with a smaller tile size, e.g. --tile {}", tile)
            } else {
                format!("Retry with tiling enabled, e.g. --tile {}", tile)
            };
            RevivError::ResourceExhausted { details, hint }
        }
        EngineFailure::Unreachable(message) => RevivError::Bridge { message },
        EngineFailure::Failed(reason) => RevivError::Inference { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_tile() {
        assert_eq!(suggested_tile(&TilingConfig::default()), 400);
        assert_eq!(suggested_tile(&TilingConfig::default().with_tile(256)), 128);
        assert_eq!(suggested_tile(&TilingConfig::default().with_tile(1)), 1);
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(EngineFailure::OutOfMemory("CUDA".into()), &TilingConfig::default());
        match &err {
            RevivError::ResourceExhausted { hint, .. } => assert!(hint.contains("--tile 400")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_retryable());

        let err = classify_failure(EngineFailure::Unreachable("refused".into()), &TilingConfig::default());
        assert_eq!(err.error_code(), "BRIDGE_ERROR");

        let err = classify_failure(EngineFailure::Failed("nan".into()), &TilingConfig::default());
        assert_eq!(err.error_code(), "INFERENCE_ERROR");
        assert!(!err.is_retryable());
    }
}
