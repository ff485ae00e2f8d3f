//! Face enhancement
//!
//! Decorates a background enhancer: the whole image is upscaled as usual,
//! then every detected face is restored by a dedicated model and pasted
//! back over the upscaled background.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EngineResult, Enhancer};
use crate::imaging::{PixelBuffer, PixelLayout};

/// Face bounding box in input-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub score: f32,
}

impl FaceBox {
    /// Clip to an image of the given size; `None` if nothing is left
    pub fn clip(&self, width: u32, height: u32) -> Option<FaceBox> {
        if self.x >= width || self.y >= height || self.width == 0 || self.height == 0 {
            return None;
        }
        Some(FaceBox {
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
            ..*self
        })
    }
}

/// Face detection and restoration model
pub trait FaceRestorer: Send {
    /// Find faces in an RGB image
    fn detect(&mut self, image: &PixelBuffer) -> EngineResult<Vec<FaceBox>>;

    /// Restore one RGB face crop; the result has the crop's dimensions.
    fn restore(&mut self, face: &PixelBuffer) -> EngineResult<PixelBuffer>;
}

pub type SharedFaceRestorer = Arc<Mutex<Box<dyn FaceRestorer>>>;

/// Background enhancer plus face restoration
pub struct FaceEnhancer<B: Enhancer> {
    restorer: SharedFaceRestorer,
    background: B,
}

impl<B: Enhancer> FaceEnhancer<B> {
    pub fn new(restorer: SharedFaceRestorer, background: B) -> Self {
        Self {
            restorer,
            background,
        }
    }
}

impl<B: Enhancer> Enhancer for FaceEnhancer<B> {
    fn enhance(&mut self, image: &PixelBuffer, outscale: f32) -> EngineResult<PixelBuffer> {
        let mut output = self.background.enhance(image, outscale)?;

        let rgb = image.to_layout(PixelLayout::Rgb);
        let mut restorer = self.restorer.lock().unwrap_or_else(PoisonError::into_inner);
        let faces = restorer.detect(&rgb)?;
        debug!(faces = faces.len(), "face detection");

        let (out_w, out_h) = output.dimensions();
        let scale_x = out_w as f32 / image.width() as f32;
        let scale_y = out_h as f32 / image.height() as f32;

        for face in faces.iter().filter_map(|f| f.clip(image.width(), image.height())) {
            let crop = rgb.crop(face.x, face.y, face.width, face.height);
            let restored = restorer.restore(&crop)?;

            let x0 = (face.x as f32 * scale_x).round() as u32;
            let y0 = (face.y as f32 * scale_y).round() as u32;
            let w = ((face.width as f32 * scale_x).round() as u32).max(1);
            let h = ((face.height as f32 * scale_y).round() as u32).max(1);
            if x0 >= out_w || y0 >= out_h {
                continue;
            }

            let patch = restored.resize(w, h);
            output.blend_patch(&patch, x0, y0, w.min(h) / 16);
        }
        Ok(output)
    }
}
