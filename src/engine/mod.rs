//! Engine Module
//!
//! Everything between a resolved set of weights and a restored image:
//! - Network trait (one forward pass on a CHW tensor)
//! - Upsampler (padding, tiling and layout handling around a network)
//! - Face enhancement decorator
//! - Backends that construct networks (HTTP bridge, mock)

pub mod backend;
pub mod bridge;
pub mod face;
pub mod mock;
pub mod options;
pub mod upsampler;

pub use backend::EngineBackend;
pub use bridge::BridgeBackend;
pub use face::{FaceBox, FaceEnhancer, FaceRestorer};
pub use mock::{MockBackend, MockFaceRestorer, MockNetwork};
pub use options::{DeviceSelector, EngineKey, EngineSpec, Precision};
pub use upsampler::{TilingConfig, Upsampler};

use std::sync::{Arc, Mutex};

use ndarray::{Array3, ArrayView3};
use thiserror::Error;

use crate::imaging::PixelBuffer;

/// Failure inside a forward pass, before it is mapped to a request error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineFailure {
    /// The device ran out of memory; a smaller tile may succeed
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The process hosting the network could not be reached
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Failed(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineFailure>;

/// A constructed super-resolution network.
///
/// Input is RGB, 3 x H x W, values in [0, 1]. Output is 3 x H*s x W*s for
/// the network's native scale `s`.
pub trait Network: Send {
    fn forward(&mut self, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>>;
}

/// Networks are shared between the engine cache and in-flight requests
pub type SharedNetwork = Arc<Mutex<Box<dyn Network>>>;

/// Anything that turns an image into an upscaled image
pub trait Enhancer: Send {
    /// Upscale `image` by `outscale`, keeping its pixel layout.
    fn enhance(&mut self, image: &PixelBuffer, outscale: f32) -> EngineResult<PixelBuffer>;
}

/// Final output size for `outscale`: `floor(w * outscale)`, at least 1
pub fn scaled_dimensions(width: u32, height: u32, outscale: f32) -> (u32, u32) {
    let scale = |v: u32| ((v as f64 * outscale as f64).floor() as u32).max(1);
    (scale(width), scale(height))
}
