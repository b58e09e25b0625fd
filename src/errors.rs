// SPDX-License-Identifier: GPL-3.0-only

//! Error types shared by the capture, render, encode and storage layers

use std::fmt;

use crate::backends::camera::BackendError;

/// Result type alias using CoreError
pub type CoreResult<T> = Result<T, CoreError>;

/// Payload-free error classification handed to session listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceUnavailable,
    DeviceAlreadyOpen,
    StorageUnavailable,
    EncoderBusy,
    EncodingFailed,
    UnsupportedOperation,
    GpuUnavailable,
}

/// Errors surfaced by the pipeline core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No sensor matches the request, or the device refused to open
    DeviceUnavailable(String),
    /// A camera is already open in this session
    DeviceAlreadyOpen,
    /// The output directory could not be prepared
    StorageUnavailable(String),
    /// A recording is already starting, running or stopping
    EncoderBusy,
    /// Encoder or muxer failure; the partial file has been discarded
    EncodingFailed(String),
    /// The request makes no sense for the current device or state
    UnsupportedOperation(String),
    /// GPU context creation failed or is already in progress
    GpuUnavailable(String),
}

impl CoreError {
    /// Classification used by listener callbacks
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            CoreError::DeviceAlreadyOpen => ErrorKind::DeviceAlreadyOpen,
            CoreError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            CoreError::EncoderBusy => ErrorKind::EncoderBusy,
            CoreError::EncodingFailed(_) => ErrorKind::EncodingFailed,
            CoreError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            CoreError::GpuUnavailable(_) => ErrorKind::GpuUnavailable,
        }
    }

    /// Whether the session must release devices and discard partial output
    pub fn requires_reset(&self) -> bool {
        !matches!(
            self,
            CoreError::UnsupportedOperation(_) | CoreError::EncoderBusy
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::DeviceAlreadyOpen => "device already open",
            ErrorKind::StorageUnavailable => "storage unavailable",
            ErrorKind::EncoderBusy => "encoder busy",
            ErrorKind::EncodingFailed => "encoding failed",
            ErrorKind::UnsupportedOperation => "unsupported operation",
            ErrorKind::GpuUnavailable => "GPU unavailable",
        };
        f.write_str(name)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DeviceUnavailable(msg) => write!(f, "Camera unavailable: {}", msg),
            CoreError::DeviceAlreadyOpen => write!(f, "A camera is already open"),
            CoreError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            CoreError::EncoderBusy => write!(f, "Encoder is busy"),
            CoreError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            CoreError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            CoreError::GpuUnavailable(msg) => write!(f, "GPU unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceBusy => CoreError::DeviceAlreadyOpen,
            BackendError::NotSupported(msg) => CoreError::UnsupportedOperation(msg),
            other => CoreError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::StorageUnavailable(err.to_string())
    }
}
