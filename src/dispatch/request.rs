//! Request and result types

use std::path::PathBuf;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{DeviceSelector, Precision, TilingConfig};
use crate::error::{Result, RevivError};
use crate::imaging::PixelBuffer;
use crate::registry::{ModelFamily, ModelId};

/// Largest image, in pixels, one request may produce. This covers both the
/// network's native output and the final resample (128 Mi pixels).
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 27;

/// Per-request knobs, as chosen on the selection surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    /// 0 keeps the most noise suppression, 1 disables the denoise blend.
    /// Only models with a denoise companion use it.
    pub denoise_strength: f32,
    /// Final scale relative to the input
    pub outscale: f32,
    /// Use this weights file instead of the cache
    pub model_path: Option<PathBuf>,
    pub tiling: TilingConfig,
    pub face_enhance: bool,
    pub precision: Precision,
    pub device: DeviceSelector,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            denoise_strength: 0.5,
            outscale: 4.0,
            model_path: None,
            tiling: TilingConfig::default(),
            face_enhance: false,
            precision: Precision::Half,
            device: DeviceSelector::Auto,
        }
    }
}

impl InferenceOptions {
    /// Check ranges; nothing here touches the filesystem.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.denoise_strength) {
            return Err(RevivError::InvalidParameter {
                param: "denoise_strength".to_string(),
                value: self.denoise_strength.to_string(),
                expected: "a value between 0 and 1".to_string(),
            });
        }
        if !self.outscale.is_finite() || self.outscale <= 0.0 {
            return Err(RevivError::InvalidParameter {
                param: "outscale".to_string(),
                value: self.outscale.to_string(),
                expected: "a positive number".to_string(),
            });
        }
        Ok(())
    }

    /// Reject requests whose output would not fit in memory, before
    /// anything is allocated.
    ///
    /// The network output is bounded using the padded input (pre-pad plus at
    /// most 3 pixels of modulo padding).
    pub fn check_output_size(&self, width: u32, height: u32, native_scale: u32) -> Result<()> {
        let limit = MAX_OUTPUT_PIXELS as f64;
        let padding = self.tiling.pre_pad as f64 + 3.0;
        let scale = native_scale as f64;
        let native = (width as f64 + padding) * scale * (height as f64 + padding) * scale;
        if native > limit {
            let (param, value) = if self.tiling.pre_pad > 0 {
                ("pre_pad", self.tiling.pre_pad.to_string())
            } else {
                ("image", format!("{}x{}", width, height))
            };
            return Err(RevivError::InvalidParameter {
                param: param.to_string(),
                value,
                expected: format!("a network output of at most {} pixels", MAX_OUTPUT_PIXELS),
            });
        }

        let outscale = self.outscale as f64;
        let output = (width as f64 * outscale).floor() * (height as f64 * outscale).floor();
        if output > limit {
            return Err(RevivError::InvalidParameter {
                param: "outscale".to_string(),
                value: self.outscale.to_string(),
                expected: format!(
                    "an output of at most {} pixels for a {}x{} input",
                    MAX_OUTPUT_PIXELS, width, height
                ),
            });
        }
        Ok(())
    }
}

/// One restoration job. Consumed by the dispatcher.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Correlates log lines of one request
    pub id: Uuid,
    pub family: ModelFamily,
    pub model: String,
    pub image: PixelBuffer,
    pub options: InferenceOptions,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, image: PixelBuffer) -> Self {
        Self {
            id: Uuid::new_v4(),
            family: ModelFamily::default(),
            model: model.into(),
            image,
            options: InferenceOptions::default(),
        }
    }

    pub fn with_family(mut self, family: ModelFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_denoise_strength(mut self, strength: f32) -> Self {
        self.options.denoise_strength = strength;
        self
    }

    pub fn with_outscale(mut self, outscale: f32) -> Self {
        self.options.outscale = outscale;
        self
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.model_path = Some(path.into());
        self
    }

    pub fn with_tile(mut self, tile: u32) -> Self {
        self.options.tiling.tile = tile;
        self
    }

    pub fn with_face_enhance(mut self, enabled: bool) -> Self {
        self.options.face_enhance = enabled;
        self
    }

    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.options.device = device;
        self
    }
}

/// A successful restoration
#[derive(Debug, Clone)]
pub struct Restored {
    /// Same pixel layout as the input
    pub image: PixelBuffer,
    pub model: ModelId,
    pub outscale: f32,
    pub elapsed_ms: u64,
}

/// A restoration encoded for download
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub bytes: Vec<u8>,
    /// `<stem>-upscaled.<ext>`
    pub file_name: String,
    pub format: ImageFormat,
    pub dimensions: (u32, u32),
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::PixelLayout;
    use test_case::test_case;

    #[test]
    fn test_defaults_match_selection_surface() {
        let options = InferenceOptions::default();
        assert_eq!(options.denoise_strength, 0.5);
        assert_eq!(options.outscale, 4.0);
        assert_eq!(options.tiling, TilingConfig { tile: 0, tile_pad: 10, pre_pad: 0 });
        assert!(!options.face_enhance);
        assert_eq!(options.precision, Precision::Half);
        assert!(options.validate().is_ok());
    }

    #[test_case(-0.1, 4.0 ; "negative denoise")]
    #[test_case(1.5, 4.0 ; "denoise above one")]
    #[test_case(f32::NAN, 4.0 ; "nan denoise")]
    #[test_case(0.5, 0.0 ; "zero outscale")]
    #[test_case(0.5, -2.0 ; "negative outscale")]
    #[test_case(0.5, f32::INFINITY ; "infinite outscale")]
    fn test_validate_rejects(denoise: f32, outscale: f32) {
        let options = InferenceOptions {
            denoise_strength: denoise,
            outscale,
            ..Default::default()
        };
        assert_eq!(options.validate().unwrap_err().error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_output_size_bound() {
        let options = InferenceOptions::default();
        assert!(options.check_output_size(2048, 2048, 4).is_ok());

        let huge = InferenceOptions {
            outscale: 1.0e12,
            ..Default::default()
        };
        match huge.check_output_size(4, 4, 4).unwrap_err() {
            RevivError::InvalidParameter { param, .. } => assert_eq!(param, "outscale"),
            other => panic!("unexpected error: {other}"),
        }

        let padded = InferenceOptions {
            tiling: TilingConfig {
                pre_pad: u32::MAX,
                ..Default::default()
            },
            outscale: 1.0,
            ..Default::default()
        };
        match padded.check_output_size(4, 4, 4).unwrap_err() {
            RevivError::InvalidParameter { param, .. } => assert_eq!(param, "pre_pad"),
            other => panic!("unexpected error: {other}"),
        }

        // x4 native output of a 4096 square is too large even at outscale 1
        let native = InferenceOptions {
            outscale: 1.0,
            ..Default::default()
        };
        assert!(native.check_output_size(4096, 4096, 4).is_err());
    }

    #[test]
    fn test_requests_get_distinct_ids() {
        let image = PixelBuffer::from_fn(1, 1, PixelLayout::Rgb, |_, _| [0; 4]);
        let a = InferenceRequest::new("RealESRGAN_x4plus", image.clone());
        let b = InferenceRequest::new("RealESRGAN_x4plus", image).with_tile(256);
        assert_ne!(a.id, b.id);
        assert_eq!(b.options.tiling.tile, 256);
        assert_eq!(a.family, ModelFamily::RealEsrgan);
    }
}
