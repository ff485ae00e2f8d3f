//! Model descriptors
//!
//! Static description of every pretrained network the dispatcher can run:
//! architecture parameters, native scale and where the weights come from.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::RevivError;

/// Closed set of dispatchable model identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelId {
    RealEsrganX4Plus,
    RealEsrnetX4Plus,
    RealEsrganX4PlusAnime6B,
    RealEsrganX2Plus,
    AnimeVideoV3,
    GeneralX4V3,
}

impl ModelId {
    pub const ALL: [ModelId; 6] = [
        ModelId::RealEsrganX4Plus,
        ModelId::RealEsrnetX4Plus,
        ModelId::RealEsrganX4PlusAnime6B,
        ModelId::RealEsrganX2Plus,
        ModelId::AnimeVideoV3,
        ModelId::GeneralX4V3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealEsrganX4Plus => "RealESRGAN_x4plus",
            Self::RealEsrnetX4Plus => "RealESRNet_x4plus",
            Self::RealEsrganX4PlusAnime6B => "RealESRGAN_x4plus_anime_6B",
            Self::RealEsrganX2Plus => "RealESRGAN_x2plus",
            Self::AnimeVideoV3 => "realesr-animevideov3",
            Self::GeneralX4V3 => "realesr-general-x4v3",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = RevivError;

    /// Accepts the bare identifier or a weights file name
    /// (`RealESRGAN_x4plus.pth`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let stem = name.split('.').next().unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == stem)
            .ok_or_else(|| RevivError::UnknownModel {
                model: name.to_string(),
            })
    }
}

/// Network architecture family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkFamily {
    /// RRDBNet: residual-in-residual dense blocks
    ResidualDenseBlockNet,
    /// SRVGGNetCompact: plain conv stack with pixel shuffle
    CompactVggStyleNet,
}

impl NetworkFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResidualDenseBlockNet => "RRDBNet",
            Self::CompactVggStyleNet => "SRVGGNetCompact",
        }
    }
}

/// Constructor parameters for the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchParams {
    pub in_channels: u32,
    pub out_channels: u32,
    pub features: u32,
    /// Dense blocks for RRDBNet, conv layers for SRVGGNetCompact
    pub blocks: u32,
    /// RRDBNet only
    pub growth_channels: Option<u32>,
    pub scale: u32,
    /// SRVGGNetCompact only
    pub activation: Option<&'static str>,
}

impl ArchParams {
    const fn rrdb(blocks: u32, scale: u32) -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            features: 64,
            blocks,
            growth_channels: Some(32),
            scale,
            activation: None,
        }
    }

    const fn srvgg(convs: u32) -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            features: 64,
            blocks: convs,
            growth_channels: None,
            scale: 4,
            activation: Some("prelu"),
        }
    }
}

/// Weighted-denoise variant blended with the primary weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DenoiseCompanion {
    pub identifier: &'static str,
    pub weight_urls: &'static [&'static str],
}

/// Everything needed to fetch and build one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub family: NetworkFamily,
    pub arch: ArchParams,
    pub native_scale: u32,
    /// Mirrors of the same weights file, tried in order
    pub weight_urls: &'static [&'static str],
    pub denoise_companion: Option<DenoiseCompanion>,
}

impl ModelDescriptor {
    pub fn identifier(&self) -> &'static str {
        self.id.as_str()
    }

    /// File name of the primary weights inside the cache directory
    pub fn weights_file_name(&self) -> String {
        format!("{}.pth", self.identifier())
    }

    /// Whether this model exposes a tunable denoise strength
    pub fn supports_denoise_blend(&self) -> bool {
        self.denoise_companion.is_some()
    }
}

macro_rules! release_url {
    ($tag:literal, $file:literal) => {
        concat!(
            "https://github.com/xinntao/Real-ESRGAN/releases/download/",
            $tag,
            "/",
            $file
        )
    };
}

pub(crate) static DESCRIPTORS: [ModelDescriptor; 6] = [
    ModelDescriptor {
        id: ModelId::RealEsrganX4Plus,
        family: NetworkFamily::ResidualDenseBlockNet,
        arch: ArchParams::rrdb(23, 4),
        native_scale: 4,
        weight_urls: &[release_url!("v0.1.0", "RealESRGAN_x4plus.pth")],
        denoise_companion: None,
    },
    ModelDescriptor {
        id: ModelId::RealEsrnetX4Plus,
        family: NetworkFamily::ResidualDenseBlockNet,
        arch: ArchParams::rrdb(23, 4),
        native_scale: 4,
        weight_urls: &[release_url!("v0.1.1", "RealESRNet_x4plus.pth")],
        denoise_companion: None,
    },
    ModelDescriptor {
        id: ModelId::RealEsrganX4PlusAnime6B,
        family: NetworkFamily::ResidualDenseBlockNet,
        arch: ArchParams::rrdb(6, 4),
        native_scale: 4,
        weight_urls: &[release_url!("v0.2.2.4", "RealESRGAN_x4plus_anime_6B.pth")],
        denoise_companion: None,
    },
    ModelDescriptor {
        id: ModelId::RealEsrganX2Plus,
        family: NetworkFamily::ResidualDenseBlockNet,
        arch: ArchParams::rrdb(23, 2),
        native_scale: 2,
        weight_urls: &[release_url!("v0.2.1", "RealESRGAN_x2plus.pth")],
        denoise_companion: None,
    },
    ModelDescriptor {
        id: ModelId::AnimeVideoV3,
        family: NetworkFamily::CompactVggStyleNet,
        arch: ArchParams::srvgg(16),
        native_scale: 4,
        weight_urls: &[release_url!("v0.2.5.0", "realesr-animevideov3.pth")],
        denoise_companion: None,
    },
    ModelDescriptor {
        id: ModelId::GeneralX4V3,
        family: NetworkFamily::CompactVggStyleNet,
        arch: ArchParams::srvgg(32),
        native_scale: 4,
        weight_urls: &[release_url!("v0.2.5.0", "realesr-general-x4v3.pth")],
        denoise_companion: Some(DenoiseCompanion {
            identifier: "realesr-general-wdn-x4v3",
            weight_urls: &[release_url!("v0.2.5.0", "realesr-general-wdn-x4v3.pth")],
        }),
    },
];
