//! CLI Module
//!
//! Command-line interface for RevivIA image restoration.

pub mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::dispatch::InferenceOptions;
use crate::engine::{DeviceSelector, Precision, TilingConfig};
use crate::registry::ModelFamily;

/// RevivIA - restore and upscale old photos with Real-ESRGAN
#[derive(Parser, Debug)]
#[command(name = "revivia")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore and upscale an image
    #[command(name = "upscale")]
    Upscale(UpscaleArgs),

    /// List the available models
    #[command(name = "models")]
    Models {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download weights ahead of time
    #[command(name = "fetch")]
    Fetch {
        /// Models to fetch (all when empty)
        models: Vec<String>,

        /// Also fetch the face restoration weights
        #[arg(long)]
        face: bool,
    },

    /// Show the cached weight files
    #[command(name = "cache")]
    Cache,
}

/// Where the networks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// HTTP inference bridge
    Bridge,
    /// Nearest-neighbour stand-in, for trying the pipeline without a GPU
    Mock,
}

#[derive(Args, Debug)]
pub struct UpscaleArgs {
    /// Input image (JPEG or PNG)
    pub input: PathBuf,

    /// Output file or directory (default: next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Model family
    #[arg(long, default_value = "RealESRGAN")]
    pub family: ModelFamily,

    /// Model name
    #[arg(short = 'n', long, default_value = "RealESRGAN_x4plus")]
    pub model: String,

    /// Denoise strength, 0 for weak denoise, 1 for strong. Only used by
    /// realesr-general-x4v3
    #[arg(short = 'd', long, default_value_t = 0.5)]
    pub denoise_strength: f32,

    /// Final upsampling scale
    #[arg(short = 's', long, default_value_t = 4.0)]
    pub outscale: f32,

    /// Weights file to use instead of the cache
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Tile size, 0 for no tiling
    #[arg(short = 't', long, default_value_t = 0)]
    pub tile: u32,

    /// Tile padding
    #[arg(long, default_value_t = 10)]
    pub tile_pad: u32,

    /// Pre padding size at each border
    #[arg(long, default_value_t = 0)]
    pub pre_pad: u32,

    /// Restore faces with GFPGAN
    #[arg(long)]
    pub face_enhance: bool,

    /// Use fp32 precision during inference (default: fp16)
    #[arg(long)]
    pub fp32: bool,

    /// auto, cpu, gpu or gpu:N
    #[arg(long, default_value = "auto")]
    pub device: DeviceSelector,

    #[arg(long, value_enum, default_value_t = BackendKind::Bridge)]
    pub backend: BackendKind,
}

impl UpscaleArgs {
    pub fn options(&self) -> InferenceOptions {
        InferenceOptions {
            denoise_strength: self.denoise_strength,
            outscale: self.outscale,
            model_path: self.model_path.clone(),
            tiling: TilingConfig {
                tile: self.tile,
                tile_pad: self.tile_pad,
                pre_pad: self.pre_pad,
            },
            face_enhance: self.face_enhance,
            precision: Precision::from_fp32(self.fp32),
            device: self.device,
        }
    }
}
