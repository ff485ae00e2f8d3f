//! HTTP inference bridge
//!
//! The networks themselves run in an external inference server. This
//! backend registers networks and face restorers with it and streams
//! tensors back and forth:
//!
//! - `POST /v1/networks` (JSON) -> `{"id": ...}`
//! - `POST /v1/networks/{id}/forward`, little-endian f32 CHW body with an
//!   `x-tensor-shape: c,h,w` header, answered in the same encoding
//! - `POST /v1/faces` (JSON) -> `{"id": ...}`
//! - `POST /v1/faces/{id}/detect` and `/restore`, RGB u8 body with an
//!   `x-image-shape: h,w` header
//!
//! Device memory exhaustion is reported as HTTP 507 or a JSON body with
//! `"code": "out_of_memory"`.

use std::path::Path;
use std::time::Duration;

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use super::backend::EngineBackend;
use super::face::FaceRestorer;
use super::options::{DeviceSelector, EngineSpec};
use super::{EngineFailure, EngineResult, Network};
use crate::config::Config;
use crate::error::{Result, RevivError};
use crate::registry::ArchParams;

pub const TENSOR_SHAPE_HEADER: &str = "x-tensor-shape";
pub const IMAGE_SHAPE_HEADER: &str = "x-image-shape";

/// HTTP status the bridge uses for device memory exhaustion
const INSUFFICIENT_STORAGE: u16 = 507;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateNetworkRequest<'a> {
    model: &'a str,
    family: &'a str,
    arch: ArchParams,
    weights: Vec<String>,
    /// Blend coefficients for the weights, in order
    dni_weight: Option<[f32; 2]>,
    half: bool,
    device: String,
}

#[derive(Debug, Serialize)]
struct CreateFaceRestorerRequest {
    weights: String,
    arch: &'static str,
    channel_multiplier: u32,
    device: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// ============================================================================
// Encoding
// ============================================================================

/// Little-endian f32 samples in C, H, W order
pub fn encode_tensor(tensor: ArrayView3<'_, f32>) -> Vec<u8> {
    tensor.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_tensor(bytes: &[u8], shape: (usize, usize, usize)) -> EngineResult<Array3<f32>> {
    let (c, h, w) = shape;
    if bytes.len() != c * h * w * 4 {
        return Err(EngineFailure::Failed(format!(
            "tensor body is {} bytes, expected {} for shape {:?}",
            bytes.len(),
            c * h * w * 4,
            shape
        )));
    }
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array3::from_shape_vec(shape, samples).map_err(|e| EngineFailure::Failed(e.to_string()))
}

/// Parse `c,h,w`
pub fn parse_shape(header: &str) -> Option<(usize, usize, usize)> {
    let dims: Vec<usize> = header
        .split(',')
        .map(|d| d.trim().parse().ok())
        .collect::<Option<_>>()?;
    match dims.as_slice() {
        [c, h, w] => Some((*c, *h, *w)),
        _ => None,
    }
}

/// Map an unsuccessful bridge response to an engine failure
pub fn classify_status(status: u16, body: &str) -> EngineFailure {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    let out_of_memory = status == INSUFFICIENT_STORAGE
        || parsed.as_ref().map(|b| b.code == "out_of_memory").unwrap_or(false);
    if out_of_memory {
        EngineFailure::OutOfMemory(message)
    } else {
        EngineFailure::Failed(format!("bridge returned HTTP {}: {}", status, message))
    }
}

fn weight_paths(spec: &EngineSpec) -> Vec<String> {
    spec.weights
        .paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect()
}

// ============================================================================
// Backend
// ============================================================================

/// Engine backend talking to the HTTP inference bridge
pub struct BridgeBackend {
    base_url: String,
    timeout: Duration,
    #[cfg(feature = "remote")]
    client: reqwest::blocking::Client,
}

impl BridgeBackend {
    #[cfg(feature = "remote")]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RevivError::Bridge {
                message: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    #[cfg(not(feature = "remote"))]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.bridge_url.clone(), config.bridge_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use crate::engine::face::FaceBox;
    use crate::imaging::{PixelBuffer, PixelLayout};
    use reqwest::blocking::{Client, Response};
    use tracing::{debug, info};

    fn transport_failure(e: reqwest::Error) -> EngineFailure {
        if e.is_connect() || e.is_timeout() {
            EngineFailure::Unreachable(e.to_string())
        } else {
            EngineFailure::Failed(e.to_string())
        }
    }

    /// Turn a non-2xx response into an engine failure
    fn check(response: Response) -> EngineResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(classify_status(status, &body))
    }

    impl BridgeBackend {
        fn create<T: Serialize>(&self, path: &str, request: &T) -> Result<String> {
            let url = format!("{}{}", self.base_url, path);
            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .map_err(|e| RevivError::Bridge {
                    message: format!("cannot reach bridge at {}: {}", self.base_url, e),
                })?;
            let response = check(response).map_err(|e| RevivError::Bridge {
                message: e.to_string(),
            })?;
            let created: CreatedResponse = response.json().map_err(|e| RevivError::Bridge {
                message: format!("invalid response from bridge: {}", e),
            })?;
            Ok(created.id)
        }
    }

    impl EngineBackend for BridgeBackend {
        fn name(&self) -> &'static str {
            "bridge"
        }

        fn build_network(&self, spec: &EngineSpec) -> Result<Box<dyn Network>> {
            let request = CreateNetworkRequest {
                model: spec.descriptor.identifier(),
                family: spec.descriptor.family.as_str(),
                arch: spec.descriptor.arch,
                weights: weight_paths(spec),
                dni_weight: spec.weights.blend,
                half: spec.precision.is_half(),
                device: spec.device.to_string(),
            };
            let id = self.create("/v1/networks", &request)?;
            info!(model = request.model, id = %id, device = %request.device, "bridge network ready");

            Ok(Box::new(BridgeNetwork {
                client: self.client.clone(),
                url: format!("{}/v1/networks/{}/forward", self.base_url, id),
            }))
        }

        fn build_face_restorer(&self, weights: &Path, device: DeviceSelector) -> Result<Box<dyn FaceRestorer>> {
            let request = CreateFaceRestorerRequest {
                weights: weights.display().to_string(),
                arch: "clean",
                channel_multiplier: 2,
                device: device.to_string(),
            };
            let id = self.create("/v1/faces", &request)?;
            info!(id = %id, "bridge face restorer ready");

            Ok(Box::new(BridgeFaceRestorer {
                client: self.client.clone(),
                url: format!("{}/v1/faces/{}", self.base_url, id),
            }))
        }
    }

    /// Network hosted by the bridge
    pub struct BridgeNetwork {
        client: Client,
        url: String,
    }

    impl Network for BridgeNetwork {
        fn forward(&mut self, input: ArrayView3<'_, f32>) -> EngineResult<Array3<f32>> {
            let (c, h, w) = input.dim();
            debug!(c, h, w, "bridge forward");
            let response = self
                .client
                .post(&self.url)
                .header(TENSOR_SHAPE_HEADER, format!("{},{},{}", c, h, w))
                .body(encode_tensor(input))
                .send()
                .map_err(transport_failure)?;
            let response = check(response)?;

            let shape = response
                .headers()
                .get(TENSOR_SHAPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_shape)
                .ok_or_else(|| EngineFailure::Failed(format!("missing {} header", TENSOR_SHAPE_HEADER)))?;
            let body = response.bytes().map_err(transport_failure)?;
            decode_tensor(&body, shape)
        }
    }

    /// Face restorer hosted by the bridge
    pub struct BridgeFaceRestorer {
        client: Client,
        url: String,
    }

    impl BridgeFaceRestorer {
        fn post_image(&self, action: &str, image: &PixelBuffer) -> EngineResult<Response> {
            let rgb = image.to_layout(PixelLayout::Rgb);
            let response = self
                .client
                .post(format!("{}/{}", self.url, action))
                .header(IMAGE_SHAPE_HEADER, format!("{},{}", rgb.height(), rgb.width()))
                .body(rgb.into_data())
                .send()
                .map_err(transport_failure)?;
            check(response)
        }
    }

    impl FaceRestorer for BridgeFaceRestorer {
        fn detect(&mut self, image: &PixelBuffer) -> EngineResult<Vec<FaceBox>> {
            self.post_image("detect", image)?
                .json()
                .map_err(|e| EngineFailure::Failed(format!("invalid face boxes: {}", e)))
        }

        fn restore(&mut self, face: &PixelBuffer) -> EngineResult<PixelBuffer> {
            let body = self.post_image("restore", face)?.bytes().map_err(transport_failure)?;
            PixelBuffer::new(face.width(), face.height(), PixelLayout::Rgb, body.to_vec())
                .map_err(|e| EngineFailure::Failed(e.to_string()))
        }
    }
}

#[cfg(not(feature = "remote"))]
impl EngineBackend for BridgeBackend {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn build_network(&self, _spec: &EngineSpec) -> Result<Box<dyn Network>> {
        Err(RevivError::Bridge {
            message: "bridge support not compiled. Build with --features remote".to_string(),
        })
    }

    fn build_face_restorer(&self, _weights: &Path, _device: DeviceSelector) -> Result<Box<dyn FaceRestorer>> {
        Err(RevivError::Bridge {
            message: "bridge support not compiled. Build with --features remote".to_string(),
        })
    }
}
