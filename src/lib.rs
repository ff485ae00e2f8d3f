//! RevivIA - Image Restoration Core
//!
//! Takes an uploaded photo and a model choice and returns the photo
//! restored and upscaled by a pretrained Real-ESRGAN network.
//!
//! # Architecture
//!
//! - `registry`: the six supported models and their architecture parameters
//! - `weights`: on-disk weight cache with single-flight downloads
//! - `engine`: upsampler (padding, tiling, alpha), face decorator, backends
//! - `dispatch`: the request pipeline tying the above together
//!
//! ```no_run
//! use std::sync::Arc;
//! use revivia::{Config, Dispatcher, InferenceRequest, MockBackend, PixelBuffer, PixelLayout};
//!
//! let dispatcher = Dispatcher::from_config(&Config::from_env(), Arc::new(MockBackend::new()));
//! let image = PixelBuffer::from_fn(64, 64, PixelLayout::Rgb, |x, y| [x as u8, y as u8, 0, 0]);
//! let restored = dispatcher.restore(InferenceRequest::new("RealESRGAN_x2plus", image).with_outscale(2.0))?;
//! assert_eq!(restored.image.dimensions(), (128, 128));
//! # Ok::<(), revivia::RevivError>(())
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod imaging;
pub mod registry;
pub mod weights;

pub use config::Config;
pub use dispatch::{Dispatcher, EncodedOutput, InferenceOptions, InferenceRequest, Restored};
pub use engine::{BridgeBackend, DeviceSelector, EngineBackend, MockBackend, Precision, TilingConfig};
pub use error::{Result, RevivError};
pub use imaging::{PixelBuffer, PixelLayout};
pub use registry::{describe, ModelDescriptor, ModelFamily, ModelId};
pub use weights::{ResolvedWeights, WeightCache};
