//! Model registry
//!
//! Static lookup from a model identifier to its descriptor, plus the
//! family enumeration the selection surface offers.

mod descriptor;

pub use descriptor::{ArchParams, DenoiseCompanion, ModelDescriptor, ModelId, NetworkFamily};

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RevivError};

/// Look up the descriptor for `identifier`.
///
/// Pure lookup; fails with `UnknownModel` for anything outside the six
/// enumerated identifiers.
pub fn describe(identifier: &str) -> Result<&'static ModelDescriptor> {
    let id: ModelId = identifier.parse()?;
    Ok(descriptor_for(id))
}

/// Descriptor for an already-parsed identifier
pub fn descriptor_for(id: ModelId) -> &'static ModelDescriptor {
    descriptor::DESCRIPTORS
        .iter()
        .find(|d| d.id == id)
        .unwrap_or_else(|| unreachable!("descriptor table covers every ModelId"))
}

/// All descriptors, in selection order
pub fn all() -> &'static [ModelDescriptor] {
    &descriptor::DESCRIPTORS
}

/// Model families offered by the selection surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ModelFamily {
    #[default]
    RealEsrgan,
    /// Selectable, but nothing dispatches it yet
    Bsrgan,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::RealEsrgan, ModelFamily::Bsrgan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealEsrgan => "RealESRGAN",
            Self::Bsrgan => "BSRGAN",
        }
    }

    /// Identifiers the selection surface lists under this family
    pub fn identifiers(&self) -> Vec<&'static str> {
        match self {
            Self::RealEsrgan => ModelId::ALL.iter().map(|id| id.as_str()).collect(),
            Self::Bsrgan => vec!["BSRGAN"],
        }
    }

    /// Whether the dispatcher has a path for this family
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::RealEsrgan)
    }

    /// Resolve an identifier selected under this family.
    ///
    /// Identifiers the family does not list are `UnknownModel`; listed
    /// identifiers of an undispatched family are `NotImplemented`.
    pub fn resolve(&self, identifier: &str) -> Result<&'static ModelDescriptor> {
        match self {
            Self::RealEsrgan => describe(identifier),
            Self::Bsrgan => {
                let stem = identifier.split('.').next().unwrap_or(identifier);
                if self.identifiers().contains(&stem) {
                    Err(RevivError::NotImplemented {
                        family: self.as_str().to_string(),
                    })
                } else {
                    Err(RevivError::UnknownModel {
                        model: identifier.to_string(),
                    })
                }
            }
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = RevivError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RevivError::InvalidParameter {
                param: "family".to_string(),
                value: s.to_string(),
                expected: "RealESRGAN or BSRGAN".to_string(),
            })
    }
}
