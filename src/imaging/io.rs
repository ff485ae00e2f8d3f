//! Image file I/O
//!
//! Decodes uploaded bytes, encodes results back into the same container
//! and names the download.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, ImageOutputFormat};

use crate::error::{Result, RevivError};
use crate::imaging::buffer::PixelBuffer;

/// Suffix appended to the original base filename
pub const UPSCALED_SUFFIX: &str = "-upscaled";

const JPEG_QUALITY: u8 = 95;

/// A decoded upload together with the container it came in
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub buffer: PixelBuffer,
    pub format: ImageFormat,
}

/// Decode an encoded image (JPEG, PNG).
///
/// # Errors
/// * `DecodeError` - If the bytes are not a recognizable or valid image
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage> {
    let format = image::guess_format(bytes).map_err(|e| RevivError::DecodeError {
        reason: "unrecognized image format".to_string(),
        source: Some(e),
    })?;

    let image = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        RevivError::DecodeError {
            reason: format!("invalid {:?} data", format),
            source: Some(e),
        }
    })?;

    Ok(DecodedImage {
        buffer: PixelBuffer::from_dynamic(image),
        format,
    })
}

/// Encode `buffer` into `format`. JPEG output drops alpha.
pub fn encode_image(buffer: &PixelBuffer, format: ImageFormat) -> Result<Vec<u8>> {
    let mut image = buffer.to_dynamic();
    let output_format = match format {
        ImageFormat::Jpeg => {
            if buffer.layout().has_alpha() {
                image = image::DynamicImage::ImageRgb8(image.to_rgb8());
            }
            ImageOutputFormat::Jpeg(JPEG_QUALITY)
        }
        other => other.into(),
    };

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, output_format)
        .map_err(|e| RevivError::Encode {
            reason: format!("cannot write {:?}", format),
            source: Some(e),
        })?;
    Ok(out.into_inner())
}

/// Download name for a restored upload: `photo.jpg` -> `photo-upscaled.jpg`.
///
/// The original extension is kept only when it names `format`; otherwise
/// the container's canonical extension is used.
pub fn upscaled_file_name(original: &str, format: ImageFormat) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    let extension = path
        .extension()
        .filter(|e| ImageFormat::from_extension(e) == Some(format))
        .map(|e| e.to_string_lossy().into_owned())
        .or_else(|| format.extensions_str().first().map(|e| e.to_string()))
        .unwrap_or_else(|| "png".to_string());
    format!("{}{}.{}", stem, UPSCALED_SUFFIX, extension)
}
