//! [`Engine`] implementation backed by `libtensorflowlite_c`.

use std::ffi::{c_char, c_void, CStr};

use super::ffi;
use super::{Engine, InterpreterHandle, ModelHandle, Status, TensorHandle};

/// The native TensorFlow Lite engine.
///
/// The C API only reports failures through its error reporter callback, which
/// takes a `va_list`; diagnostics are therefore limited to status codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TfLiteEngine;

impl Engine for TfLiteEngine {
    fn name(&self) -> &'static str {
        "tflite"
    }

    fn version(&self) -> String {
        unsafe {
            let ptr = ffi::TfLiteVersion();
            if ptr.is_null() {
                "unknown".to_string()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }

    unsafe fn model_create(&self, data: *const u8, len: usize) -> ModelHandle {
        ffi::TfLiteModelCreate(data.cast(), len).cast()
    }

    unsafe fn model_delete(&self, model: ModelHandle) {
        ffi::TfLiteModelDelete(model.cast());
    }

    unsafe fn interpreter_create(&self, model: ModelHandle, num_threads: i32) -> InterpreterHandle {
        let options = ffi::TfLiteInterpreterOptionsCreate();
        if options.is_null() {
            return std::ptr::null_mut();
        }
        ffi::TfLiteInterpreterOptionsSetNumThreads(options, num_threads);

        let interpreter = ffi::TfLiteInterpreterCreate(model.cast_const().cast(), options);

        // The interpreter copies what it needs from the options.
        ffi::TfLiteInterpreterOptionsDelete(options);
        interpreter.cast()
    }

    unsafe fn interpreter_delete(&self, interpreter: InterpreterHandle) {
        ffi::TfLiteInterpreterDelete(interpreter.cast());
    }

    unsafe fn input_tensor_count(&self, interpreter: InterpreterHandle) -> i32 {
        ffi::TfLiteInterpreterGetInputTensorCount(interpreter.cast_const().cast())
    }

    unsafe fn output_tensor_count(&self, interpreter: InterpreterHandle) -> i32 {
        ffi::TfLiteInterpreterGetOutputTensorCount(interpreter.cast_const().cast())
    }

    unsafe fn input_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle {
        ffi::TfLiteInterpreterGetInputTensor(interpreter.cast_const().cast(), index).cast()
    }

    unsafe fn output_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle {
        ffi::TfLiteInterpreterGetOutputTensor(interpreter.cast_const().cast(), index)
            .cast_mut()
            .cast()
    }

    unsafe fn resize_input_tensor(
        &self,
        interpreter: InterpreterHandle,
        index: i32,
        dims: *const i32,
        dims_len: i32,
    ) -> Status {
        Status(ffi::TfLiteInterpreterResizeInputTensor(
            interpreter.cast(),
            index,
            dims,
            dims_len,
        ))
    }

    unsafe fn allocate_tensors(&self, interpreter: InterpreterHandle) -> Status {
        Status(ffi::TfLiteInterpreterAllocateTensors(interpreter.cast()))
    }

    unsafe fn invoke(&self, interpreter: InterpreterHandle) -> Status {
        Status(ffi::TfLiteInterpreterInvoke(interpreter.cast()))
    }

    unsafe fn tensor_type(&self, tensor: TensorHandle) -> i32 {
        ffi::TfLiteTensorType(tensor.cast_const().cast())
    }

    unsafe fn tensor_num_dims(&self, tensor: TensorHandle) -> i32 {
        ffi::TfLiteTensorNumDims(tensor.cast_const().cast())
    }

    unsafe fn tensor_dim(&self, tensor: TensorHandle, dim_index: i32) -> i32 {
        ffi::TfLiteTensorDim(tensor.cast_const().cast(), dim_index)
    }

    unsafe fn tensor_byte_size(&self, tensor: TensorHandle) -> usize {
        ffi::TfLiteTensorByteSize(tensor.cast_const().cast())
    }

    unsafe fn tensor_name(&self, tensor: TensorHandle) -> *const c_char {
        ffi::TfLiteTensorName(tensor.cast_const().cast())
    }

    unsafe fn tensor_copy_from_buffer(
        &self,
        tensor: TensorHandle,
        data: *const c_void,
        len: usize,
    ) -> Status {
        Status(ffi::TfLiteTensorCopyFromBuffer(tensor.cast(), data, len))
    }

    unsafe fn tensor_copy_to_buffer(
        &self,
        tensor: TensorHandle,
        data: *mut c_void,
        len: usize,
    ) -> Status {
        Status(ffi::TfLiteTensorCopyToBuffer(tensor.cast_const().cast(), data, len))
    }
}
