//! Upsampler
//!
//! Runs a network over a whole image: layout conversion, reflect padding so
//! the network sees compatible sizes, optional tiling to bound memory, alpha
//! handling and the final resample to the requested output scale.

use std::sync::PoisonError;

use ndarray::{s, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{scaled_dimensions, EngineFailure, EngineResult, Enhancer, Network, SharedNetwork};
use crate::imaging::buffer::luma;
use crate::imaging::PixelBuffer;

// ============================================================================
// Tiling
// ============================================================================

/// Tile size 0 disables tiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile: u32,
    /// Context added around each tile, discarded from its output
    pub tile_pad: u32,
    /// Reflect padding added to the right and bottom before inference
    pub pre_pad: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile: 0,
            tile_pad: 10,
            pre_pad: 0,
        }
    }
}

impl TilingConfig {
    pub fn is_tiled(&self) -> bool {
        self.tile > 0
    }

    pub fn with_tile(mut self, tile: u32) -> Self {
        self.tile = tile;
        self
    }
}

// ============================================================================
// Upsampler
// ============================================================================

/// Whole-image super-resolution around a single network
pub struct Upsampler {
    network: SharedNetwork,
    native_scale: u32,
    tiling: TilingConfig,
}

impl Upsampler {
    pub fn new(network: SharedNetwork, native_scale: u32, tiling: TilingConfig) -> Self {
        Self {
            network,
            native_scale,
            tiling,
        }
    }

    pub fn native_scale(&self) -> u32 {
        self.native_scale
    }

    pub fn tiling(&self) -> TilingConfig {
        self.tiling
    }

    /// Pad, run and un-pad one RGB plane stack
    fn upsample_planes(&self, network: &mut dyn Network, planes: &Array3<f32>) -> EngineResult<Array3<f32>> {
        let scale = self.native_scale as usize;
        let (_, height, width) = planes.dim();
        let pre_pad = self.tiling.pre_pad as usize;

        let padded_h = height + pre_pad;
        let padded_w = width + pre_pad;
        let modulo = match self.native_scale {
            2 => 2,
            1 => 4,
            _ => 1,
        };
        let mod_pad_h = (modulo - padded_h % modulo) % modulo;
        let mod_pad_w = (modulo - padded_w % modulo) % modulo;

        let input = reflect_pad(planes, pre_pad + mod_pad_h, pre_pad + mod_pad_w);
        let output = if self.tiling.is_tiled() {
            self.forward_tiled(network, input.view())?
        } else {
            forward_checked(network, input.view(), scale)?
        };

        Ok(output
            .slice(s![.., ..height * scale, ..width * scale])
            .to_owned())
    }

    /// Forward pass tile by tile, each tile with `tile_pad` context that is
    /// cropped from its output before it is placed.
    fn forward_tiled(&self, network: &mut dyn Network, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>> {
        let scale = self.native_scale as usize;
        let tile = self.tiling.tile as usize;
        let tile_pad = self.tiling.tile_pad as usize;
        let (channels, height, width) = input.dim();
        let mut output = Array3::<f32>::zeros((channels, height * scale, width * scale));

        let tiles_y = height.div_ceil(tile);
        let tiles_x = width.div_ceil(tile);
        debug!(tiles_x, tiles_y, tile, tile_pad, "tiled forward pass");

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let (y0, x0) = (ty * tile, tx * tile);
                let (y1, x1) = ((y0 + tile).min(height), (x0 + tile).min(width));
                let (py0, px0) = (y0.saturating_sub(tile_pad), x0.saturating_sub(tile_pad));
                let (py1, px1) = ((y1 + tile_pad).min(height), (x1 + tile_pad).min(width));

                let tile_out = forward_checked(network, input.slice(s![.., py0..py1, px0..px1]), scale)?;

                let (oy, ox) = ((y0 - py0) * scale, (x0 - px0) * scale);
                let (oh, ow) = ((y1 - y0) * scale, (x1 - x0) * scale);
                output
                    .slice_mut(s![.., y0 * scale..y1 * scale, x0 * scale..x1 * scale])
                    .assign(&tile_out.slice(s![.., oy..oy + oh, ox..ox + ow]));
            }
        }
        Ok(output)
    }
}

impl Enhancer for Upsampler {
    fn enhance(&mut self, image: &PixelBuffer, outscale: f32) -> EngineResult<PixelBuffer> {
        let (rgb, alpha) = image.to_rgb_planes();

        let mut network = self.network.lock().unwrap_or_else(PoisonError::into_inner);

        let upscaled = self.upsample_planes(network.as_mut(), &rgb)?;
        let alpha = match alpha {
            Some(alpha) => {
                let (h, w) = alpha.dim();
                let replicated = Array3::from_shape_fn((3, h, w), |(_, y, x)| alpha[[y, x]]);
                let planes = self.upsample_planes(network.as_mut(), &replicated)?;
                Some(planes.map_axis(Axis(0), |px| luma(px[0], px[1], px[2])))
            }
            None => None,
        };
        drop(network);

        let restored = PixelBuffer::from_rgb_planes(&upscaled, alpha.as_ref(), image.layout())
            .map_err(|e| EngineFailure::Failed(e.to_string()))?;

        if outscale != self.native_scale as f32 {
            let (w, h) = scaled_dimensions(image.width(), image.height(), outscale);
            debug!(from = ?restored.dimensions(), to = ?(w, h), "resampling to output scale");
            return Ok(restored.resize(w, h));
        }
        Ok(restored)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Run `network` and check it produced `3 x H*scale x W*scale`
fn forward_checked(network: &mut dyn Network, input: ArrayView3<'_, f32>, scale: usize) -> EngineResult<Array3<f32>> {
    let (channels, height, width) = input.dim();
    let output = network.forward(input)?;
    let expected = (channels, height * scale, width * scale);
    if output.dim() != expected {
        return Err(EngineFailure::Failed(format!(
            "network returned {:?}, expected {:?}",
            output.dim(),
            expected
        )));
    }
    Ok(output)
}

/// Mirror an out-of-range index back into `0..len`, excluding the edge
/// sample (`[a b c] -> a b c b a b c`).
fn reflect_index(i: usize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let i = i % period;
    if i < len {
        i
    } else {
        period - i
    }
}

/// Reflect-pad the bottom and right edges of a CHW tensor
fn reflect_pad(input: &Array3<f32>, pad_h: usize, pad_w: usize) -> Array3<f32> {
    if pad_h == 0 && pad_w == 0 {
        return input.clone();
    }
    let (channels, height, width) = input.dim();
    Array3::from_shape_fn((channels, height + pad_h, width + pad_w), |(c, y, x)| {
        input[[c, reflect_index(y, height), reflect_index(x, width)]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockNetwork;
    use crate::imaging::PixelLayout;
    use std::sync::{Arc, Mutex};

    /// Records the input shape of every call
    struct ShapeRecorder {
        scale: usize,
        shapes: Arc<Mutex<Vec<(usize, usize, usize)>>>,
    }

    impl Network for ShapeRecorder {
        fn forward(&mut self, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>> {
            self.shapes.lock().unwrap().push(input.dim());
            let (c, h, w) = input.dim();
            Ok(Array3::zeros((c, h * self.scale, w * self.scale)))
        }
    }

    struct WrongShape;

    impl Network for WrongShape {
        fn forward(&mut self, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>> {
            Ok(input.to_owned())
        }
    }

    fn shared(network: impl Network + 'static) -> SharedNetwork {
        let boxed: Box<dyn Network> = Box::new(network);
        Arc::new(Mutex::new(boxed))
    }

    fn photo(width: u32, height: u32, layout: PixelLayout) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, layout, |x, y| {
            [(x * 13 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8, (x * y % 256) as u8]
        })
    }

    #[test]
    fn test_reflect_index() {
        let mirrored: Vec<_> = (0..7).map(|i| reflect_index(i, 3)).collect();
        assert_eq!(mirrored, vec![0, 1, 2, 1, 0, 1, 2]);
        assert_eq!(reflect_index(5, 1), 0);
    }

    #[test]
    fn test_reflect_pad_bottom_right() {
        let input = Array3::from_shape_fn((1, 2, 3), |(_, y, x)| (y * 3 + x) as f32);
        let padded = reflect_pad(&input, 1, 2);
        assert_eq!(padded.dim(), (1, 3, 5));
        assert_eq!(padded[[0, 0, 3]], 1.0);
        assert_eq!(padded[[0, 0, 4]], 0.0);
        assert_eq!(padded[[0, 2, 0]], 0.0);
    }

    #[test]
    fn test_native_scale_output_dimensions() {
        let mut upsampler = Upsampler::new(shared(MockNetwork::new(4)), 4, TilingConfig::default());
        let out = upsampler.enhance(&photo(7, 5, PixelLayout::Rgb), 4.0).unwrap();
        assert_eq!(out.dimensions(), (28, 20));
    }

    #[test]
    fn test_x2_pads_odd_sizes_to_even() {
        let shapes = Arc::new(Mutex::new(Vec::new()));
        let network = ShapeRecorder {
            scale: 2,
            shapes: shapes.clone(),
        };
        let mut upsampler = Upsampler::new(shared(network), 2, TilingConfig::default());
        let out = upsampler.enhance(&photo(7, 5, PixelLayout::Rgb), 2.0).unwrap();

        assert_eq!(out.dimensions(), (14, 10));
        assert_eq!(shapes.lock().unwrap().as_slice(), &[(3, 6, 8)]);
    }

    #[test]
    fn test_tiled_pass_matches_whole_image() {
        let image = photo(23, 17, PixelLayout::Rgb);
        let mut whole = Upsampler::new(shared(MockNetwork::new(4)), 4, TilingConfig::default());
        let tiling = TilingConfig {
            tile: 8,
            tile_pad: 3,
            pre_pad: 2,
        };
        let mut tiled = Upsampler::new(shared(MockNetwork::new(4)), 4, tiling);

        assert_eq!(
            tiled.enhance(&image, 4.0).unwrap(),
            whole.enhance(&image, 4.0).unwrap()
        );
    }

    #[test]
    fn test_tiles_cover_the_image() {
        let shapes = Arc::new(Mutex::new(Vec::new()));
        let network = ShapeRecorder {
            scale: 4,
            shapes: shapes.clone(),
        };
        let tiling = TilingConfig::default().with_tile(16);
        let mut upsampler = Upsampler::new(shared(network), 4, tiling);
        upsampler.enhance(&photo(40, 20, PixelLayout::Rgb), 4.0).unwrap();

        let shapes = shapes.lock().unwrap();
        assert_eq!(shapes.len(), 3 * 2);
        // First tile: 16 plus 10 context on the right and bottom
        assert_eq!(shapes[0], (3, 20, 26));
    }

    #[test]
    fn test_bgr_and_alpha_survive() {
        for layout in [PixelLayout::Bgr, PixelLayout::Bgra, PixelLayout::Gray] {
            let image = photo(6, 4, layout);
            let mut upsampler = Upsampler::new(shared(MockNetwork::new(4)), 4, TilingConfig::default());
            let out = upsampler.enhance(&image, 4.0).unwrap();

            assert_eq!(out.layout(), layout);
            for (x, y) in [(0, 0), (5, 3), (2, 1)] {
                assert_eq!(out.pixel(x * 4 + 3, y * 4 + 1), image.pixel(x, y), "{:?}", layout);
            }
        }
    }

    #[test]
    fn test_fractional_outscale_resamples() {
        let mut upsampler = Upsampler::new(shared(MockNetwork::new(4)), 4, TilingConfig::default());
        let out = upsampler.enhance(&photo(10, 6, PixelLayout::Rgba), 2.5).unwrap();
        assert_eq!(out.dimensions(), (25, 15));
        assert_eq!(out.layout(), PixelLayout::Rgba);
    }

    #[test]
    fn test_wrong_output_shape_fails() {
        let mut upsampler = Upsampler::new(shared(WrongShape), 4, TilingConfig::default());
        let err = upsampler.enhance(&photo(4, 4, PixelLayout::Rgb), 4.0).unwrap_err();
        assert!(matches!(err, EngineFailure::Failed(_)));
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let network = MockNetwork::new(4).with_memory_limit(100);
        let mut upsampler = Upsampler::new(shared(network), 4, TilingConfig::default());
        let err = upsampler.enhance(&photo(20, 20, PixelLayout::Rgb), 4.0).unwrap_err();
        assert!(matches!(err, EngineFailure::OutOfMemory(_)));

        let network = MockNetwork::new(4).with_memory_limit(100);
        let tiling = TilingConfig {
            tile: 5,
            tile_pad: 2,
            pre_pad: 0,
        };
        let mut tiled = Upsampler::new(shared(network), 4, tiling);
        assert_eq!(tiled.enhance(&photo(20, 20, PixelLayout::Rgb), 4.0).unwrap().dimensions(), (80, 80));
    }
}
