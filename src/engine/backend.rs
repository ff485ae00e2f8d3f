//! Engine backends
//!
//! A backend turns an [`EngineSpec`] into a runnable network, and face
//! weights into a face restorer.

use std::path::Path;

use super::face::FaceRestorer;
use super::options::{DeviceSelector, EngineSpec};
use super::Network;
use crate::error::Result;

pub trait EngineBackend: Send + Sync {
    /// Short name for logs and the CLI
    fn name(&self) -> &'static str;

    /// Construct the network described by `spec`, blending the companion
    /// weights when `spec.weights.blend` is set.
    fn build_network(&self, spec: &EngineSpec) -> Result<Box<dyn Network>>;

    /// Construct a face restorer from GFPGAN weights
    fn build_face_restorer(&self, weights: &Path, device: DeviceSelector) -> Result<Box<dyn FaceRestorer>>;
}
