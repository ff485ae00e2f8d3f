//! Mock engine implementations for testing
//!
//! These don't run real networks but reproduce the observable behavior the
//! dispatcher depends on: output shapes, device memory limits and face
//! boxes. Pixel values are predictable (nearest-neighbour upscale) so tests
//! can check them exactly.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array3, ArrayView3};
use tracing::debug;

use super::backend::EngineBackend;
use super::face::{FaceBox, FaceRestorer};
use super::options::{DeviceSelector, EngineSpec};
use super::{EngineFailure, EngineResult, Network};
use crate::error::{Result, RevivError};
use crate::imaging::{PixelBuffer, PixelLayout};

/// Nearest-neighbour "network" with an optional memory ceiling
#[derive(Debug, Clone)]
pub struct MockNetwork {
    scale: usize,
    /// Largest input (H * W) that fits on the simulated device
    max_pixels: Option<usize>,
}

impl MockNetwork {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale as usize,
            max_pixels: None,
        }
    }

    pub fn with_memory_limit(mut self, max_pixels: usize) -> Self {
        self.max_pixels = Some(max_pixels);
        self
    }
}

impl Network for MockNetwork {
    fn forward(&mut self, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>> {
        let (channels, height, width) = input.dim();
        if let Some(max) = self.max_pixels {
            if height * width > max {
                return Err(EngineFailure::OutOfMemory(format!(
                    "CUDA out of memory. Tried to allocate a {}x{} tile (limit {} pixels)",
                    width, height, max
                )));
            }
        }
        let s = self.scale;
        Ok(Array3::from_shape_fn((channels, height * s, width * s), |(c, y, x)| {
            input[[c, y / s, x / s]]
        }))
    }
}

/// Face restorer that reports fixed boxes
#[derive(Debug, Clone, Default)]
pub struct MockFaceRestorer {
    faces: Vec<FaceBox>,
    /// Restored faces become this solid RGB color; `None` returns the crop
    fill: Option<[u8; 3]>,
}

impl MockFaceRestorer {
    pub fn new(faces: Vec<FaceBox>) -> Self {
        Self { faces, fill: None }
    }

    pub fn with_fill(mut self, rgb: [u8; 3]) -> Self {
        self.fill = Some(rgb);
        self
    }
}

impl FaceRestorer for MockFaceRestorer {
    fn detect(&mut self, _image: &PixelBuffer) -> EngineResult<Vec<FaceBox>> {
        Ok(self.faces.clone())
    }

    fn restore(&mut self, face: &PixelBuffer) -> EngineResult<PixelBuffer> {
        Ok(match self.fill {
            Some([r, g, b]) => PixelBuffer::from_fn(face.width(), face.height(), PixelLayout::Rgb, |_, _| {
                [r, g, b, 255]
            }),
            None => face.to_layout(PixelLayout::Rgb),
        })
    }
}

/// Backend producing mock networks; counts constructions so tests can
/// observe the engine cache.
#[derive(Debug, Default)]
pub struct MockBackend {
    memory_limit: Option<usize>,
    faces: Vec<FaceBox>,
    face_fill: Option<[u8; 3]>,
    networks_built: AtomicUsize,
    face_restorers_built: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_limit(mut self, max_pixels: usize) -> Self {
        self.memory_limit = Some(max_pixels);
        self
    }

    pub fn with_faces(mut self, faces: Vec<FaceBox>, fill: [u8; 3]) -> Self {
        self.faces = faces;
        self.face_fill = Some(fill);
        self
    }

    pub fn networks_built(&self) -> usize {
        self.networks_built.load(Ordering::SeqCst)
    }

    pub fn face_restorers_built(&self) -> usize {
        self.face_restorers_built.load(Ordering::SeqCst)
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(RevivError::Inference {
            reason: format!("weights file not found: {}", path.display()),
        })
    }
}

impl EngineBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn build_network(&self, spec: &EngineSpec) -> Result<Box<dyn Network>> {
        for path in spec.weights.paths() {
            require_file(path)?;
        }
        self.networks_built.fetch_add(1, Ordering::SeqCst);
        debug!(model = spec.descriptor.identifier(), "building mock network");

        let mut network = MockNetwork::new(spec.descriptor.native_scale);
        if let Some(max) = self.memory_limit {
            network = network.with_memory_limit(max);
        }
        Ok(Box::new(network))
    }

    fn build_face_restorer(&self, weights: &Path, _device: DeviceSelector) -> Result<Box<dyn FaceRestorer>> {
        require_file(weights)?;
        self.face_restorers_built.fetch_add(1, Ordering::SeqCst);

        let mut restorer = MockFaceRestorer::new(self.faces.clone());
        if let Some(fill) = self.face_fill {
            restorer = restorer.with_fill(fill);
        }
        Ok(Box::new(restorer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nearest_upscale() {
        let input = array![[[0.1f32, 0.2], [0.3, 0.4]]];
        let out = MockNetwork::new(2).forward(input.view()).unwrap();
        assert_eq!(out.dim(), (1, 4, 4));
        assert_eq!(out[[0, 1, 1]], 0.1);
        assert_eq!(out[[0, 3, 2]], 0.4);
    }

    #[test]
    fn test_memory_limit() {
        let mut network = MockNetwork::new(4).with_memory_limit(16);
        assert!(network.forward(Array3::zeros((3, 4, 4)).view()).is_ok());
        let err = network.forward(Array3::zeros((3, 4, 5)).view()).unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn test_restorer_fill() {
        let crop = PixelBuffer::from_fn(3, 2, PixelLayout::Rgb, |_, _| [1, 2, 3, 0]);
        let mut restorer = MockFaceRestorer::new(Vec::new()).with_fill([9, 8, 7]);
        let out = restorer.restore(&crop).unwrap();
        assert_eq!(out.dimensions(), (3, 2));
        assert_eq!(out.pixel(2, 1), &[9, 8, 7]);
    }
}
