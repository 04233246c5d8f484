//! Error types for tflite-bridge.
//!
//! Every failure crossing the boundary, whether a native status code or a
//! malformed host argument, is reported as a [`BridgeError`]. The
//! [`ErrorKind`] returned by [`BridgeError::kind`] is the machine-readable
//! part; the message names the operation that failed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::Status;

/// Result type alias for tflite-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while driving the inference engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wrong argument count, kind or shape, detected before any native call.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The model could not be parsed or the interpreter could not be created.
    #[error("Construction failed: {0}")]
    Construction(String),

    /// The engine rejected a requested input shape.
    #[error("Resize failed: {0}")]
    Resize(String),

    /// The engine could not allocate tensor storage.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The engine reported a failure during inference.
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// Buffer length mismatch or copy against an unallocated tensor.
    #[error("Tensor copy failed: {0}")]
    Copy(String),

    /// The interpreter was destroyed or the tensor view is stale.
    #[error("Resource released: {0}")]
    Released(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Machine-distinguishable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Construction,
    Resize,
    Allocation,
    Invocation,
    Copy,
    Released,
    Config,
    Io,
}

impl ErrorKind {
    /// The name hosts see for this kind, e.g. `"AllocationError"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Argument => "ArgumentError",
            Self::Construction => "ConstructionError",
            Self::Resize => "ResizeError",
            Self::Allocation => "AllocationError",
            Self::Invocation => "InvocationError",
            Self::Copy => "CopyError",
            Self::Released => "ReleasedError",
            Self::Config => "ConfigError",
            Self::Io => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native operations whose failures are translated into [`BridgeError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateModel,
    CreateInterpreter,
    ResizeInputTensor,
    AllocateTensors,
    Invoke,
    CopyFromBuffer,
    CopyToBuffer,
}

impl Operation {
    /// Engine-level name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateModel => "CreateModel",
            Self::CreateInterpreter => "CreateInterpreter",
            Self::ResizeInputTensor => "ResizeInputTensor",
            Self::AllocateTensors => "AllocateTensors",
            Self::Invoke => "Invoke",
            Self::CopyFromBuffer => "CopyFromBuffer",
            Self::CopyToBuffer => "CopyToBuffer",
        }
    }

    /// Error kind a failure of this operation is reported as.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::CreateModel | Self::CreateInterpreter => ErrorKind::Construction,
            Self::ResizeInputTensor => ErrorKind::Resize,
            Self::AllocateTensors => ErrorKind::Allocation,
            Self::Invoke => ErrorKind::Invocation,
            Self::CopyFromBuffer | Self::CopyToBuffer => ErrorKind::Copy,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BridgeError {
    /// Create an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a copy error.
    pub fn copy(msg: impl Into<String>) -> Self {
        Self::Copy(msg.into())
    }

    /// Create a released-resource error.
    pub fn released(msg: impl Into<String>) -> Self {
        Self::Released(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Translate a failed native operation into the matching error variant.
    ///
    /// The message always starts with `"<Operation> failed"`; the status name
    /// and the engine diagnostic are appended when available.
    pub fn native(op: Operation, status: Option<Status>, detail: Option<String>) -> Self {
        let mut msg = format!("{} failed", op);
        if let Some(status) = status {
            msg.push_str(&format!(" ({})", status));
        }
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            msg.push_str(": ");
            msg.push_str(&detail);
        }
        match op.error_kind() {
            ErrorKind::Construction => Self::Construction(msg),
            ErrorKind::Resize => Self::Resize(msg),
            ErrorKind::Allocation => Self::Allocation(msg),
            ErrorKind::Invocation => Self::Invocation(msg),
            _ => Self::Copy(msg),
        }
    }

    /// The machine-distinguishable category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument(_) => ErrorKind::Argument,
            Self::Construction(_) => ErrorKind::Construction,
            Self::Resize(_) => ErrorKind::Resize,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Invocation(_) => ErrorKind::Invocation,
            Self::Copy(_) => ErrorKind::Copy,
            Self::Released(_) => ErrorKind::Released,
            Self::Config(_) | Self::Yaml(_) | Self::Json(_) => ErrorKind::Config,
            Self::Io(_) | Self::FileNotFound(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::argument("Buffer expected");
        assert_eq!(format!("{}", err), "Invalid argument: Buffer expected");

        let err = BridgeError::config("model.path is not set");
        assert_eq!(format!("{}", err), "Configuration error: model.path is not set");

        let err = BridgeError::FileNotFound(PathBuf::from("/path/to/model.tflite"));
        assert_eq!(format!("{}", err), "File not found: /path/to/model.tflite");
    }

    #[test]
    fn test_native_translation() {
        let err = BridgeError::native(Operation::AllocateTensors, Some(Status::ERROR), None);
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_eq!(
            err.to_string(),
            "Allocation failed: AllocateTensors failed (kTfLiteError)"
        );

        let err = BridgeError::native(
            Operation::ResizeInputTensor,
            Some(Status::ERROR),
            Some("dimension -1 is negative".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Resize);
        assert!(err.to_string().contains("ResizeInputTensor failed"));
        assert!(err.to_string().ends_with("dimension -1 is negative"));

        let err = BridgeError::native(Operation::CreateModel, None, Some(String::new()));
        assert_eq!(err.kind(), ErrorKind::Construction);
        assert_eq!(err.to_string(), "Construction failed: CreateModel failed");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Copy.as_str(), "CopyError");
        assert_eq!(Operation::CopyToBuffer.error_kind(), ErrorKind::Copy);
        assert_eq!(Operation::Invoke.error_kind().to_string(), "InvocationError");
        let io = BridgeError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }
}
