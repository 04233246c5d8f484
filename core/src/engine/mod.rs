//! Native inference engine seam.
//!
//! The [`Engine`] trait mirrors the TensorFlow Lite C API one call at a time:
//! raw opaque handles, null on construction failure, integer status codes on
//! everything else. The safe wrappers in [`crate::interpreter`] and
//! [`crate::tensor`] are the only intended callers.

use std::ffi::{c_char, c_void};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "tflite")]
mod ffi;
pub mod reference;
#[cfg(feature = "tflite")]
mod tflite;

pub use reference::{Kernel, ModelSpec, ReferenceEngine, TensorSpec};
#[cfg(feature = "tflite")]
pub use tflite::TfLiteEngine;

/// Opaque handle to a native model.
pub type ModelHandle = *mut c_void;

/// Opaque handle to a native interpreter.
pub type InterpreterHandle = *mut c_void;

/// Opaque handle to a tensor inside an interpreter's arena.
pub type TensorHandle = *mut c_void;

/// Engine status code (`TfLiteStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const ERROR: Status = Status(1);
    pub const DELEGATE_ERROR: Status = Status(2);
    pub const APPLICATION_ERROR: Status = Status(3);
    pub const UNRESOLVED_OPS: Status = Status(7);
    pub const CANCELLED: Status = Status(8);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("kTfLiteOk"),
            1 => f.write_str("kTfLiteError"),
            2 => f.write_str("kTfLiteDelegateError"),
            3 => f.write_str("kTfLiteApplicationError"),
            4 => f.write_str("kTfLiteDelegateDataNotFound"),
            5 => f.write_str("kTfLiteDelegateDataWriteError"),
            6 => f.write_str("kTfLiteDelegateDataReadError"),
            7 => f.write_str("kTfLiteUnresolvedOps"),
            8 => f.write_str("kTfLiteCancelled"),
            code => write!(f, "status {}", code),
        }
    }
}

/// The opaque native library an interpreter is driven through.
///
/// # Safety
///
/// Every method taking a handle requires that handle to be live: produced by
/// the same engine and not yet released. Tensor handles additionally require
/// that the interpreter they came from has not been resized, reallocated or
/// deleted since. Model bytes passed to [`Engine::model_create`] must stay
/// valid until both the model and every interpreter built from it are
/// deleted. None of this is checked; callers uphold it.
pub trait Engine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Engine version string.
    fn version(&self) -> String;

    /// Last diagnostic the engine recorded, if it keeps one.
    fn last_error(&self) -> Option<String> {
        None
    }

    /// Build a model over `len` bytes at `data`. Null on parse failure.
    unsafe fn model_create(&self, data: *const u8, len: usize) -> ModelHandle;
    unsafe fn model_delete(&self, model: ModelHandle);

    /// Build an interpreter. `num_threads <= 0` selects the engine default.
    /// Null on failure.
    unsafe fn interpreter_create(&self, model: ModelHandle, num_threads: i32)
        -> InterpreterHandle;
    unsafe fn interpreter_delete(&self, interpreter: InterpreterHandle);

    unsafe fn input_tensor_count(&self, interpreter: InterpreterHandle) -> i32;
    unsafe fn output_tensor_count(&self, interpreter: InterpreterHandle) -> i32;
    unsafe fn input_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle;
    unsafe fn output_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle;

    unsafe fn resize_input_tensor(
        &self,
        interpreter: InterpreterHandle,
        index: i32,
        dims: *const i32,
        dims_len: i32,
    ) -> Status;
    unsafe fn allocate_tensors(&self, interpreter: InterpreterHandle) -> Status;
    unsafe fn invoke(&self, interpreter: InterpreterHandle) -> Status;

    unsafe fn tensor_type(&self, tensor: TensorHandle) -> i32;
    unsafe fn tensor_num_dims(&self, tensor: TensorHandle) -> i32;
    unsafe fn tensor_dim(&self, tensor: TensorHandle, dim_index: i32) -> i32;
    unsafe fn tensor_byte_size(&self, tensor: TensorHandle) -> usize;
    /// Null-terminated tensor name owned by the engine; may be null.
    unsafe fn tensor_name(&self, tensor: TensorHandle) -> *const c_char;
    unsafe fn tensor_copy_from_buffer(
        &self,
        tensor: TensorHandle,
        data: *const c_void,
        len: usize,
    ) -> Status;
    unsafe fn tensor_copy_to_buffer(&self, tensor: TensorHandle, data: *mut c_void, len: usize)
        -> Status;
}

/// Engine used when the caller does not pick one.
///
/// With the `tflite` feature this is the native TensorFlow Lite library,
/// otherwise the in-process [`ReferenceEngine`].
#[cfg(feature = "tflite")]
pub fn default_engine() -> Arc<dyn Engine> {
    Arc::new(TfLiteEngine)
}

/// Engine used when the caller does not pick one.
///
/// With the `tflite` feature this is the native TensorFlow Lite library,
/// otherwise the in-process [`ReferenceEngine`].
#[cfg(not(feature = "tflite"))]
pub fn default_engine() -> Arc<dyn Engine> {
    Arc::new(ReferenceEngine::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::OK.to_string(), "kTfLiteOk");
        assert_eq!(Status::UNRESOLVED_OPS.to_string(), "kTfLiteUnresolvedOps");
        assert_eq!(Status(42).to_string(), "status 42");
        assert!(Status::OK.is_ok());
        assert!(!Status::CANCELLED.is_ok());
    }
}
