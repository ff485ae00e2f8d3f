//! Engine construction options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::RevivError;
use crate::registry::{ModelDescriptor, ModelId};
use crate::weights::ResolvedWeights;

/// Numeric precision of the forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// fp16, the default
    #[default]
    Half,
    /// fp32
    Full,
}

impl Precision {
    pub fn from_fp32(fp32: bool) -> Self {
        if fp32 {
            Self::Full
        } else {
            Self::Half
        }
    }

    pub fn is_half(&self) -> bool {
        matches!(self, Self::Half)
    }
}

/// Which device runs the forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// Let the backend pick
    #[default]
    Auto,
    Cpu,
    Gpu(u32),
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = RevivError;

    /// `auto`, `cpu`, `gpu`, `gpu:N` or `cuda:N`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "auto" => return Ok(Self::Auto),
            "cpu" => return Ok(Self::Cpu),
            "gpu" | "cuda" => return Ok(Self::Gpu(0)),
            _ => {}
        }
        s.strip_prefix("gpu:")
            .or_else(|| s.strip_prefix("cuda:"))
            .and_then(|n| n.parse().ok())
            .map(Self::Gpu)
            .ok_or_else(|| RevivError::InvalidParameter {
                param: "device".to_string(),
                value: s.clone(),
                expected: "auto, cpu, gpu or gpu:N".to_string(),
            })
    }
}

/// Everything needed to construct one network
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub descriptor: &'static ModelDescriptor,
    pub weights: ResolvedWeights,
    pub precision: Precision,
    pub device: DeviceSelector,
}

impl EngineSpec {
    /// Construction is deterministic in these fields, so equal keys can
    /// share a network.
    pub fn cache_key(&self) -> EngineKey {
        EngineKey {
            model: self.descriptor.id,
            weights: self.weights.paths().into_iter().map(PathBuf::from).collect(),
            blend: self.weights.blend.map(|[a, b]| [a.to_bits(), b.to_bits()]),
            precision: self.precision,
            device: self.device,
        }
    }
}

/// Hashable identity of a constructed network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    model: ModelId,
    weights: Vec<PathBuf>,
    /// Coefficient bit patterns; f32 is not `Hash`
    blend: Option<[u32; 2]>,
    precision: Precision,
    device: DeviceSelector,
}
