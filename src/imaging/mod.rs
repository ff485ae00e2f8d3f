//! Imaging Module
//!
//! - Pixel buffer type and planar tensor conversion
//! - Encoded image I/O

pub mod buffer;
pub mod io;

pub use buffer::{PixelBuffer, PixelLayout};
pub use io::{decode_image, encode_image, upscaled_file_name, DecodedImage};
