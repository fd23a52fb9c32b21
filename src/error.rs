//! Error types for the wellness coach client.

use crate::session::state::Phase;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// User-visible errors that keep a session from becoming active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please select an exercise first")]
    Validation,

    #[error("Pose backend is not reachable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Could not access camera: {reason}")]
    CameraUnavailable { reason: String },

    #[error("Cannot {action} while session is {phase}")]
    InvalidTransition { phase: Phase, action: &'static str },

    #[error("Session start was cancelled")]
    Cancelled,
}

/// Transient request failures. The poll loop logs these and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Could not decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Camera acquisition errors.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera permission denied for {device}")]
    PermissionDenied { device: String },

    #[error("No camera device at {device}")]
    NoDevice { device: String },

    #[error("Camera IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text-to-speech errors. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech synthesis is not supported: {0}")]
    Unsupported(String),

    #[error("Speech synthesis failed: {0}")]
    Failed(String),
}

/// Errors from the diet and nutrition request/response clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{service} reported an error: {message}")]
    Server { service: String, message: String },

    #[error("{service} request failed: {reason}")]
    Transport { service: String, reason: String },

    #[error("Could not decode {service} response: {reason}")]
    Decode { service: String, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
