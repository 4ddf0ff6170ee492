// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture and conversion pipeline
//!
//! Empty queues and dropped frames are flow control, not errors; they show
//! up as `Option` return values. Everything here is a real failure.

use crate::backends::camera::{BackendError, PixelFormat, Side};
use crate::gpu::GpuError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type for capture source and coordinator operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Capture source or coordinator errors
    Capture(CaptureError),
    /// Texture conversion errors
    Convert(ConvertError),
    /// Configuration errors
    Config(ConfigError),
    /// GPU setup errors
    Gpu(GpuError),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Rejected configuration values
///
/// Raised synchronously by the call that requested the change; the
/// previous configuration stays active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Zero or odd dimensions
    InvalidResolution { width: u32, height: u32 },
    /// Dimensions above the texture limit
    ResolutionTooLarge { width: u32, height: u32 },
    /// Queue capacity of zero or above the limit
    InvalidCapacity(usize),
    /// Framerate of zero or above the limit
    InvalidFramerate(u32),
    /// Config file could not be parsed
    Parse(String),
}

/// Capture source errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Requested configuration was rejected
    InvalidConfig(ConfigError),
    /// Device failure (terminal for the source until retried)
    Device(BackendError),
    /// Source already failed and awaits an explicit retry
    SourceFailed(Side),
    /// No source attached for this side
    NoSource(Side),
}

/// Per-conversion errors; the frame is dropped and the pipeline continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// GPU allocation, upload or dispatch failed
    Resource(GpuError),
    /// Render target belongs to a different GPU context
    ContextMismatch,
    /// Frame buffer is smaller than its layout requires
    IncompleteFrame { expected: usize, actual: usize },
    /// Frame dimensions cannot be converted
    InvalidDimensions { width: u32, height: u32 },
    /// Pixel format not handled by the conversion program
    UnsupportedFormat(PixelFormat),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Convert(e) => write!(f, "Conversion error: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidResolution { width, height } => {
                write!(f, "Invalid resolution {}x{} (must be positive and even)", width, height)
            }
            ConfigError::ResolutionTooLarge { width, height } => {
                write!(f, "Resolution {}x{} exceeds the texture limit", width, height)
            }
            ConfigError::InvalidCapacity(capacity) => {
                write!(f, "Invalid queue capacity: {}", capacity)
            }
            ConfigError::InvalidFramerate(fps) => write!(f, "Invalid framerate: {}", fps),
            ConfigError::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidConfig(e) => write!(f, "{}", e),
            CaptureError::Device(e) => write!(f, "{}", e),
            CaptureError::SourceFailed(side) => {
                write!(f, "The {} source has failed and must be retried", side)
            }
            CaptureError::NoSource(side) => write!(f, "No {} source attached", side),
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Resource(e) => write!(f, "GPU resource error: {}", e),
            ConvertError::ContextMismatch => {
                write!(f, "Render target belongs to another GPU context")
            }
            ConvertError::IncompleteFrame { expected, actual } => {
                write!(f, "Frame buffer too small: {} bytes, expected {}", actual, expected)
            }
            ConvertError::InvalidDimensions { width, height } => {
                write!(f, "Cannot convert a {}x{} frame", width, height)
            }
            ConvertError::UnsupportedFormat(format) => {
                write!(f, "Unsupported pixel format: {}", format)
            }
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for ConvertError {}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        AppError::Convert(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<BackendError> for CaptureError {
    fn from(err: BackendError) -> Self {
        CaptureError::Device(err)
    }
}

impl From<ConfigError> for CaptureError {
    fn from(err: ConfigError) -> Self {
        CaptureError::InvalidConfig(err)
    }
}

impl From<GpuError> for ConvertError {
    fn from(err: GpuError) -> Self {
        ConvertError::Resource(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Storage(err.to_string())
    }
}
