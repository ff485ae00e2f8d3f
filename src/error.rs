//! Error handling for RevivIA
//!
//! Every failure a restore can hit is a typed variant. Variants carry an
//! error code, a retryability flag and recovery suggestions so a front end
//! can decide what to show the user.

use thiserror::Error;

/// Result type alias for RevivIA operations
pub type Result<T> = std::result::Result<T, RevivError>;

/// Main error type for RevivIA operations
#[derive(Error, Debug)]
pub enum RevivError {
    // Selection Errors
    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("Model family '{family}' is not implemented yet")]
    NotImplemented { family: String },

    #[error("Invalid parameter '{param}' = {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Weight Errors
    #[error("Weights unavailable for {model}: tried {} source(s)", attempts.len())]
    WeightsUnavailable {
        model: String,
        /// One line per source that was tried, with the reason it failed
        attempts: Vec<String>,
    },

    // Inference Errors
    #[error("Resource exhausted during inference: {details}")]
    ResourceExhausted { details: String, hint: String },

    #[error("Inference failed: {reason}")]
    Inference { reason: String },

    #[error("Inference bridge error: {message}")]
    Bridge { message: String },

    // Image Errors
    #[error("Could not decode input image: {reason}")]
    DecodeError {
        reason: String,
        #[source]
        source: Option<image::ImageError>,
    },

    #[error("Could not encode output image: {reason}")]
    Encode {
        reason: String,
        #[source]
        source: Option<image::ImageError>,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RevivError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            RevivError::UnknownModel { .. } => "UNKNOWN_MODEL",
            RevivError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            RevivError::InvalidParameter { .. } => "INVALID_PARAMETER",
            RevivError::WeightsUnavailable { .. } => "WEIGHTS_UNAVAILABLE",
            RevivError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            RevivError::Inference { .. } => "INFERENCE_ERROR",
            RevivError::Bridge { .. } => "BRIDGE_ERROR",
            RevivError::DecodeError { .. } => "DECODE_ERROR",
            RevivError::Encode { .. } => "ENCODE_ERROR",
            RevivError::Io(_) => "IO_ERROR",
            RevivError::Json(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the same request can succeed later.
    ///
    /// Weight failures need an operator (network, disk) first; resource
    /// exhaustion needs the caller to shrink the tile size.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RevivError::WeightsUnavailable { .. }
                | RevivError::ResourceExhausted { .. }
                | RevivError::Bridge { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RevivError::UnknownModel { .. } => vec![
                "Run 'revivia-cli models' to list the available models",
                "Model names are case sensitive, e.g. RealESRGAN_x4plus",
            ],
            RevivError::NotImplemented { .. } => vec![
                "Select the RealESRGAN model family instead",
            ],
            RevivError::WeightsUnavailable { .. } => vec![
                "Check the network connection to github.com",
                "Download the .pth file manually into the weights directory",
                "Pass an explicit weights file with --model-path",
            ],
            RevivError::ResourceExhausted { .. } => vec![
                "Retry with a tile size, e.g. --tile 400",
                "If tiling is already on, retry with a smaller tile size",
                "Use a smaller input image",
            ],
            RevivError::Bridge { .. } => vec![
                "Check that the inference bridge is running",
                "Verify REVIVIA_BRIDGE_URL points at the bridge",
            ],
            RevivError::DecodeError { .. } => vec![
                "Upload a JPEG or PNG image",
                "The file may be corrupted - try re-exporting it",
            ],
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            RevivError::UnknownModel { model } => {
                format!("There is no model called '{}'.", model)
            }
            RevivError::WeightsUnavailable { model, .. } => {
                format!(
                    "The weights for '{}' could not be downloaded. Try again once the network is back.",
                    model
                )
            }
            RevivError::ResourceExhausted { hint, .. } => {
                format!("The image is too large to process in one go. {}", hint)
            }
            RevivError::DecodeError { .. } => {
                "This file doesn't look like an image we can read.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RevivError::UnknownModel {
            model: "unknown-model-xyz".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_MODEL");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resource_exhausted_is_retryable() {
        let err = RevivError::ResourceExhausted {
            details: "CUDA out of memory".to_string(),
            hint: "Retry with --tile 400".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.recovery_suggestions().is_empty());
        assert!(err.friendly_message().contains("--tile 400"));
    }

    #[test]
    fn test_weights_unavailable_counts_attempts() {
        let err = RevivError::WeightsUnavailable {
            model: "RealESRGAN_x2plus".to_string(),
            attempts: vec!["a: timeout".to_string(), "b: HTTP 404".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Weights unavailable for RealESRGAN_x2plus: tried 2 source(s)"
        );
        assert!(err.is_retryable());
    }
}
