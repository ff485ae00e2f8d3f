//! Pixel Buffer
//!
//! Decoded image type shared by the codecs, the upsampler and the face
//! compositor. Pixels are interleaved 8-bit samples in one of the layouts
//! below; the network side works on planar RGB floats in [0, 1].

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, Pixel, Rgb, Rgba};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RevivError};

// ============================================================================
// Layout
// ============================================================================

/// Channel layout and order of an interleaved pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    Gray,
    Rgb,
    /// OpenCV order
    Bgr,
    Rgba,
    Bgra,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb | Self::Bgr => 3,
            Self::Rgba | Self::Bgra => 4,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::Rgba | Self::Bgra)
    }

    /// Offsets of the R, G and B samples inside one pixel
    fn rgb_offsets(&self) -> [usize; 3] {
        match self {
            Self::Gray => [0, 0, 0],
            Self::Rgb | Self::Rgba => [0, 1, 2],
            Self::Bgr | Self::Bgra => [2, 1, 0],
        }
    }

    /// Same layout without the alpha channel
    pub fn without_alpha(&self) -> Self {
        match self {
            Self::Rgba => Self::Rgb,
            Self::Bgra => Self::Bgr,
            other => *other,
        }
    }
}

/// ITU-R BT.601 luma, the weights OpenCV uses for RGB to gray
#[inline]
pub fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ============================================================================
// PixelBuffer
// ============================================================================

/// Interleaved 8-bit image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw samples; the length must be `width * height * channels`.
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * layout.channels();
        if width == 0 || height == 0 {
            return Err(RevivError::InvalidParameter {
                param: "dimensions".to_string(),
                value: format!("{}x{}", width, height),
                expected: "non-empty image".to_string(),
            });
        }
        if data.len() != expected {
            return Err(RevivError::InvalidParameter {
                param: "data".to_string(),
                value: format!("{} bytes", data.len()),
                expected: format!("{} bytes for {}x{} {:?}", expected, width, height, layout),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` for each pixel.
    ///
    /// `f` returns up to four samples; only the first `layout.channels()`
    /// are used.
    pub fn from_fn(
        width: u32,
        height: u32,
        layout: PixelLayout,
        f: impl Fn(u32, u32) -> [u8; 4],
    ) -> Self {
        let channels = layout.channels();
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y)[..channels]);
            }
        }
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Samples of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let channels = self.layout.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        &self.data[start..start + channels]
    }

    /// RGB(A) sample values of the pixel at (x, y), whatever the layout
    fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let px = self.pixel(x, y);
        let [r, g, b] = self.layout.rgb_offsets();
        let alpha = if self.layout.has_alpha() { px[3] } else { 255 };
        [px[r], px[g], px[b], alpha]
    }

    /// Convert to another layout. Gray targets use BT.601 luma.
    pub fn to_layout(&self, layout: PixelLayout) -> PixelBuffer {
        if layout == self.layout {
            return self.clone();
        }
        PixelBuffer::from_fn(self.width, self.height, layout, |x, y| {
            let [r, g, b, a] = self.rgba_at(x, y);
            match layout {
                PixelLayout::Gray => {
                    let l = luma(r as f32, g as f32, b as f32).round() as u8;
                    [l, 0, 0, 0]
                }
                PixelLayout::Rgb => [r, g, b, 0],
                PixelLayout::Bgr => [b, g, r, 0],
                PixelLayout::Rgba => [r, g, b, a],
                PixelLayout::Bgra => [b, g, r, a],
            }
        })
    }

    /// Copy out a rectangle; the rectangle is clipped to the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> PixelBuffer {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        let width = width.clamp(1, self.width - x);
        let height = height.clamp(1, self.height - y);
        let channels = self.layout.channels();
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for row in y..y + height {
            let start = (row as usize * self.width as usize + x as usize) * channels;
            data.extend_from_slice(&self.data[start..start + width as usize * channels]);
        }
        PixelBuffer {
            width,
            height,
            layout: self.layout,
            data,
        }
    }

    /// Lanczos3 resample to the given size
    pub fn resize(&self, width: u32, height: u32) -> PixelBuffer {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        let data = match self.layout.channels() {
            1 => resize_raw::<Luma<u8>>(self, width, height),
            3 => resize_raw::<Rgb<u8>>(self, width, height),
            _ => resize_raw::<Rgba<u8>>(self, width, height),
        };
        PixelBuffer {
            width,
            height,
            layout: self.layout,
            data,
        }
    }

    /// Blend an RGB patch into this image at (x0, y0).
    ///
    /// Weights ramp linearly from 0 at the patch border to 1 at `feather`
    /// pixels in; alpha samples of this image are left alone.
    pub fn blend_patch(&mut self, patch: &PixelBuffer, x0: u32, y0: u32, feather: u32) {
        let width = patch.width.min(self.width.saturating_sub(x0));
        let height = patch.height.min(self.height.saturating_sub(y0));
        let channels = self.layout.channels();
        let offsets = self.layout.rgb_offsets();

        for py in 0..height {
            for px in 0..width {
                let edge = px.min(py).min(width - 1 - px).min(height - 1 - py);
                let weight = if feather == 0 {
                    1.0
                } else {
                    ((edge + 1) as f32 / feather as f32).min(1.0)
                };
                let [r, g, b, _] = patch.rgba_at(px, py);
                let start = ((y0 + py) as usize * self.width as usize + (x0 + px) as usize) * channels;
                let dst = &mut self.data[start..start + channels];
                let mix = |old: u8, new: u8| -> u8 {
                    (old as f32 * (1.0 - weight) + new as f32 * weight).round() as u8
                };
                if self.layout == PixelLayout::Gray {
                    let l = luma(r as f32, g as f32, b as f32).round() as u8;
                    dst[0] = mix(dst[0], l);
                } else {
                    dst[offsets[0]] = mix(dst[offsets[0]], r);
                    dst[offsets[1]] = mix(dst[offsets[1]], g);
                    dst[offsets[2]] = mix(dst[offsets[2]], b);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Planar conversion
    // ------------------------------------------------------------------------

    /// Split into RGB planes (3 x H x W, values in [0, 1]) and an optional
    /// alpha plane. Gray is replicated to three channels.
    pub fn to_rgb_planes(&self) -> (Array3<f32>, Option<Array2<f32>>) {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgb = Array3::<f32>::zeros((3, h, w));
        let mut alpha = self.layout.has_alpha().then(|| Array2::<f32>::zeros((h, w)));
        let offsets = self.layout.rgb_offsets();
        let channels = self.layout.channels();

        for (i, px) in self.data.chunks_exact(channels).enumerate() {
            let (y, x) = (i / w, i % w);
            for (c, &offset) in offsets.iter().enumerate() {
                rgb[[c, y, x]] = px[offset] as f32 / 255.0;
            }
            if let Some(alpha) = alpha.as_mut() {
                alpha[[y, x]] = px[3] as f32 / 255.0;
            }
        }
        (rgb, alpha)
    }

    /// Inverse of [`to_rgb_planes`](Self::to_rgb_planes): clamp, round and
    /// interleave into `layout`.
    pub fn from_rgb_planes(
        rgb: &Array3<f32>,
        alpha: Option<&Array2<f32>>,
        layout: PixelLayout,
    ) -> Result<PixelBuffer> {
        let (_, h, w) = rgb.dim();
        let offsets = layout.rgb_offsets();
        let channels = layout.channels();
        let mut data = vec![0u8; w * h * channels];

        for (i, px) in data.chunks_exact_mut(channels).enumerate() {
            let (y, x) = (i / w, i % w);
            let (r, g, b) = (rgb[[0, y, x]], rgb[[1, y, x]], rgb[[2, y, x]]);
            if layout == PixelLayout::Gray {
                px[0] = quantize(luma(r, g, b));
                continue;
            }
            px[offsets[0]] = quantize(r);
            px[offsets[1]] = quantize(g);
            px[offsets[2]] = quantize(b);
            if layout.has_alpha() {
                px[3] = alpha.map(|a| quantize(a[[y, x]])).unwrap_or(255);
            }
        }
        PixelBuffer::new(w as u32, h as u32, layout, data)
    }

    // ------------------------------------------------------------------------
    // image crate interop
    // ------------------------------------------------------------------------

    /// Take ownership of a decoded image. 8-bit Gray/RGB/RGBA are kept as
    /// is; everything else becomes RGB or RGBA.
    pub fn from_dynamic(image: DynamicImage) -> PixelBuffer {
        let (layout, width, height, data) = match image {
            DynamicImage::ImageLuma8(buf) => (PixelLayout::Gray, buf.width(), buf.height(), buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (PixelLayout::Rgb, buf.width(), buf.height(), buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (PixelLayout::Rgba, buf.width(), buf.height(), buf.into_raw()),
            other if other.color().has_alpha() => {
                let buf = other.to_rgba8();
                (PixelLayout::Rgba, buf.width(), buf.height(), buf.into_raw())
            }
            other => {
                let buf = other.to_rgb8();
                (PixelLayout::Rgb, buf.width(), buf.height(), buf.into_raw())
            }
        };
        PixelBuffer {
            width,
            height,
            layout,
            data,
        }
    }

    /// Convert to an image crate value in RGB order
    pub fn to_dynamic(&self) -> DynamicImage {
        let expect = "buffer length checked at construction";
        match self.layout {
            PixelLayout::Gray => DynamicImage::ImageLuma8(
                ImageBuffer::from_raw(self.width, self.height, self.data.clone()).expect(expect),
            ),
            PixelLayout::Rgb | PixelLayout::Bgr => {
                let rgb = self.to_layout(PixelLayout::Rgb);
                DynamicImage::ImageRgb8(
                    ImageBuffer::from_raw(self.width, self.height, rgb.data).expect(expect),
                )
            }
            PixelLayout::Rgba | PixelLayout::Bgra => {
                let rgba = self.to_layout(PixelLayout::Rgba);
                DynamicImage::ImageRgba8(
                    ImageBuffer::from_raw(self.width, self.height, rgba.data).expect(expect),
                )
            }
        }
    }
}

fn resize_raw<P>(buffer: &PixelBuffer, width: u32, height: u32) -> Vec<u8>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let source: ImageBuffer<P, Vec<u8>> =
        ImageBuffer::from_raw(buffer.width, buffer.height, buffer.data.clone())
            .expect("buffer length checked at construction");
    imageops::resize(&source, width, height, FilterType::Lanczos3).into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gradient(layout: PixelLayout) -> PixelBuffer {
        PixelBuffer::from_fn(4, 3, layout, |x, y| {
            [(x * 60) as u8, (y * 80) as u8, 200, 128]
        })
    }

    #[test]
    fn test_new_checks_length() {
        assert!(PixelBuffer::new(2, 2, PixelLayout::Rgb, vec![0; 12]).is_ok());
        assert!(PixelBuffer::new(2, 2, PixelLayout::Rgb, vec![0; 11]).is_err());
        assert!(PixelBuffer::new(0, 2, PixelLayout::Gray, vec![]).is_err());
    }

    #[test]
    fn test_bgr_swaps_red_and_blue() {
        let rgb = gradient(PixelLayout::Rgb);
        let bgr = rgb.to_layout(PixelLayout::Bgr);
        assert_eq!(bgr.pixel(1, 0), &[200, 0, 60]);
        assert_eq!(bgr.to_layout(PixelLayout::Rgb), rgb);
    }

    #[test]
    fn test_planes_round_trip_preserves_order_and_alpha() {
        for layout in [PixelLayout::Rgb, PixelLayout::Bgr, PixelLayout::Rgba, PixelLayout::Bgra] {
            let image = gradient(layout);
            let (rgb, alpha) = image.to_rgb_planes();
            assert_eq!(alpha.is_some(), layout.has_alpha());
            // Planes are always RGB, whatever the interleaved order.
            assert!((rgb[[0, 0, 1]] - 60.0 / 255.0).abs() < 1e-6);
            assert!((rgb[[2, 0, 1]] - 200.0 / 255.0).abs() < 1e-6);

            let back = PixelBuffer::from_rgb_planes(&rgb, alpha.as_ref(), layout).unwrap();
            assert_eq!(back, image);
        }
    }

    #[test]
    fn test_crop_clips_to_bounds() {
        let image = gradient(PixelLayout::Rgb);
        let crop = image.crop(2, 1, 10, 10);
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.pixel(0, 0), image.pixel(2, 1));
    }

    #[test]
    fn test_resize_dimensions() {
        let image = gradient(PixelLayout::Rgba);
        let resized = image.resize(9, 5);
        assert_eq!(resized.dimensions(), (9, 5));
        assert_eq!(resized.layout(), PixelLayout::Rgba);
        assert_eq!(resized.data().len(), 9 * 5 * 4);
    }

    #[test]
    fn test_blend_patch_full_weight_without_feather() {
        let mut image = PixelBuffer::from_fn(4, 4, PixelLayout::Bgr, |_, _| [0, 0, 0, 0]);
        let patch = PixelBuffer::from_fn(2, 2, PixelLayout::Rgb, |_, _| [255, 10, 0, 0]);
        image.blend_patch(&patch, 1, 1, 0);
        assert_eq!(image.pixel(1, 1), &[0, 10, 255]);
        assert_eq!(image.pixel(0, 0), &[0, 0, 0]);
    }
}
