//! In-process reference engine.
//!
//! Models are JSON documents describing input/output tensors and a kernel:
//!
//! ```json
//! {
//!   "inputs":  [{ "name": "input",  "type": "Float32", "shape": [1, 4] }],
//!   "outputs": [{ "name": "output", "type": "Float32", "shape": [1, 4] }],
//!   "kernel": "identity",
//!   "arena_limit": 1048576,
//!   "max_threads": 4
//! }
//! ```
//!
//! Handles are real heap pointers and follow the same contract as the
//! native library. Live handles are tracked, so releasing a handle twice is
//! detected and counted instead of freeing memory twice.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{trace, warn};

use super::{Engine, InterpreterHandle, ModelHandle, Status, TensorHandle};
use crate::error::Result;
use crate::tensor::TensorType;

/// Declared tensor in a reference model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub tensor_type: TensorType,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, tensor_type: TensorType, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            tensor_type,
            shape: shape.to_vec(),
        }
    }
}

/// What `invoke` does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// Copy input `i` to output `i`; outputs follow input shapes.
    #[default]
    Identity,
    /// Report a failure on every invocation.
    Fail,
}

/// A reference model description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub inputs: Vec<TensorSpec>,
    #[serde(default)]
    pub outputs: Vec<TensorSpec>,
    #[serde(default)]
    pub kernel: Kernel,
    /// Largest arena, in bytes, `allocate_tensors` may reserve.
    #[serde(default)]
    pub arena_limit: Option<usize>,
    /// Largest thread count an interpreter may be created with.
    #[serde(default)]
    pub max_threads: Option<i32>,
}

impl ModelSpec {
    /// Single input, single output identity model.
    pub fn identity(tensor_type: TensorType, shape: &[usize]) -> Self {
        Self {
            inputs: vec![TensorSpec::new("input", tensor_type, shape)],
            outputs: vec![TensorSpec::new("output", tensor_type, shape)],
            kernel: Kernel::Identity,
            arena_limit: None,
            max_threads: None,
        }
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_arena_limit(mut self, limit: usize) -> Self {
        self.arena_limit = Some(limit);
        self
    }

    pub fn with_max_threads(mut self, max_threads: i32) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    /// Serialize to the bytes [`ReferenceEngine`] accepts as a model.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate model bytes.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        let spec: ModelSpec =
            serde_json::from_slice(bytes).map_err(|e| format!("unable to parse model: {}", e))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for t in self.inputs.iter().chain(&self.outputs) {
            if t.tensor_type.byte_width().is_none() {
                return Err(format!(
                    "tensor '{}' has unsupported type {}",
                    t.name, t.tensor_type
                ));
            }
            if t.name.contains('\0') {
                return Err(format!("tensor name {:?} contains a NUL byte", t.name));
            }
            if t.shape.iter().any(|&d| i32::try_from(d).is_err()) {
                return Err(format!("tensor '{}' has an oversized dimension", t.name));
            }
        }
        if self.kernel == Kernel::Identity {
            if self.inputs.len() != self.outputs.len() {
                return Err(format!(
                    "identity kernel needs matching inputs and outputs ({} vs {})",
                    self.inputs.len(),
                    self.outputs.len()
                ));
            }
            for (i, o) in self.inputs.iter().zip(&self.outputs) {
                if i.tensor_type != o.tensor_type {
                    return Err(format!(
                        "identity kernel maps {} '{}' onto {} '{}'",
                        i.tensor_type, i.name, o.tensor_type, o.name
                    ));
                }
            }
        }
        Ok(())
    }
}

struct RefModel {
    spec: ModelSpec,
}

struct RefTensor {
    name: CString,
    tensor_type: TensorType,
    dims: Vec<i32>,
    data: Option<Vec<u8>>,
}

impl RefTensor {
    fn from_spec(spec: &TensorSpec) -> Self {
        Self {
            // Validated NUL-free at parse time.
            name: CString::new(spec.name.as_str()).unwrap_or_default(),
            tensor_type: spec.tensor_type,
            dims: spec.shape.iter().map(|&d| d as i32).collect(),
            data: None,
        }
    }

    /// `None` when the size does not fit in `usize`.
    fn byte_size(&self) -> Option<usize> {
        let width = self.tensor_type.byte_width().unwrap_or(0);
        self.dims
            .iter()
            .try_fold(width, |acc, &d| acc.checked_mul(d.max(0) as usize))
    }

    /// Size reported to callers; an unrepresentable size never matches a buffer.
    fn reported_byte_size(&self) -> usize {
        self.byte_size().unwrap_or(usize::MAX)
    }
}

fn reserve_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).ok()?;
    data.resize(len, 0);
    Some(data)
}

struct RefInterpreter {
    kernel: Kernel,
    arena_limit: Option<usize>,
    inputs: Vec<RefTensor>,
    outputs: Vec<RefTensor>,
    allocated: bool,
}

/// Pure-Rust engine honouring the [`Engine`] handle contract.
#[derive(Debug, Default)]
pub struct ReferenceEngine {
    models: Mutex<HashSet<usize>>,
    interpreters: Mutex<HashSet<usize>>,
    invalid_releases: AtomicUsize,
    last_num_threads: AtomicI32,
    last_error: Mutex<Option<String>>,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Models created and not yet deleted.
    pub fn live_models(&self) -> usize {
        lock(&self.models).len()
    }

    /// Interpreters created and not yet deleted.
    pub fn live_interpreters(&self) -> usize {
        lock(&self.interpreters).len()
    }

    /// Delete calls that named a handle which was not live.
    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases.load(Ordering::SeqCst)
    }

    /// Thread count passed to the most recent `interpreter_create`.
    pub fn last_num_threads(&self) -> i32 {
        self.last_num_threads.load(Ordering::SeqCst)
    }

    fn fail(&self, msg: impl Into<String>) -> Status {
        let msg = msg.into();
        trace!(%msg, "reference engine error");
        *lock(&self.last_error) = Some(msg);
        Status::ERROR
    }

    fn release(&self, registry: &Mutex<HashSet<usize>>, handle: *mut c_void, what: &str) -> bool {
        if lock(registry).remove(&(handle as usize)) {
            true
        } else {
            warn!(?handle, "release of {} that is not live", what);
            self.invalid_releases.fetch_add(1, Ordering::SeqCst);
            false
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

unsafe fn interp<'a>(handle: InterpreterHandle) -> &'a mut RefInterpreter {
    &mut *handle.cast::<RefInterpreter>()
}

unsafe fn tensor<'a>(handle: TensorHandle) -> &'a mut RefTensor {
    &mut *handle.cast::<RefTensor>()
}

fn slot_handle(tensors: &mut [RefTensor], index: i32) -> TensorHandle {
    usize::try_from(index)
        .ok()
        .and_then(|i| tensors.get_mut(i))
        .map_or(ptr::null_mut(), |t| (t as *mut RefTensor).cast())
}

impl Engine for ReferenceEngine {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn version(&self) -> String {
        format!("reference-{}", env!("CARGO_PKG_VERSION"))
    }

    /// Returns and clears the last recorded diagnostic.
    fn last_error(&self) -> Option<String> {
        lock(&self.last_error).take()
    }

    unsafe fn model_create(&self, data: *const u8, len: usize) -> ModelHandle {
        if data.is_null() || len == 0 {
            self.fail("model buffer is empty");
            return ptr::null_mut();
        }
        let bytes = std::slice::from_raw_parts(data, len);
        match ModelSpec::from_bytes(bytes) {
            Ok(spec) => {
                let handle: ModelHandle = Box::into_raw(Box::new(RefModel { spec })).cast();
                lock(&self.models).insert(handle as usize);
                handle
            }
            Err(msg) => {
                self.fail(msg);
                ptr::null_mut()
            }
        }
    }

    unsafe fn model_delete(&self, model: ModelHandle) {
        if self.release(&self.models, model, "model") {
            drop(Box::from_raw(model.cast::<RefModel>()));
        }
    }

    unsafe fn interpreter_create(&self, model: ModelHandle, num_threads: i32) -> InterpreterHandle {
        if model.is_null() {
            self.fail("interpreter requires a model");
            return ptr::null_mut();
        }
        let spec = &(*model.cast::<RefModel>()).spec;
        self.last_num_threads.store(num_threads, Ordering::SeqCst);
        if let Some(max) = spec.max_threads {
            if num_threads > max {
                self.fail(format!(
                    "{} threads requested, model supports at most {}",
                    num_threads, max
                ));
                return ptr::null_mut();
            }
        }

        let interpreter = RefInterpreter {
            kernel: spec.kernel,
            arena_limit: spec.arena_limit,
            inputs: spec.inputs.iter().map(RefTensor::from_spec).collect(),
            outputs: spec.outputs.iter().map(RefTensor::from_spec).collect(),
            allocated: false,
        };
        let handle: InterpreterHandle = Box::into_raw(Box::new(interpreter)).cast();
        lock(&self.interpreters).insert(handle as usize);
        handle
    }

    unsafe fn interpreter_delete(&self, interpreter: InterpreterHandle) {
        if self.release(&self.interpreters, interpreter, "interpreter") {
            drop(Box::from_raw(interpreter.cast::<RefInterpreter>()));
        }
    }

    unsafe fn input_tensor_count(&self, interpreter: InterpreterHandle) -> i32 {
        interp(interpreter).inputs.len() as i32
    }

    unsafe fn output_tensor_count(&self, interpreter: InterpreterHandle) -> i32 {
        interp(interpreter).outputs.len() as i32
    }

    unsafe fn input_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle {
        slot_handle(&mut interp(interpreter).inputs, index)
    }

    unsafe fn output_tensor(&self, interpreter: InterpreterHandle, index: i32) -> TensorHandle {
        slot_handle(&mut interp(interpreter).outputs, index)
    }

    unsafe fn resize_input_tensor(
        &self,
        interpreter: InterpreterHandle,
        index: i32,
        dims: *const i32,
        dims_len: i32,
    ) -> Status {
        let interpreter = interp(interpreter);
        let Some(input) = usize::try_from(index)
            .ok()
            .and_then(|i| interpreter.inputs.get_mut(i))
        else {
            return self.fail(format!("input index {} out of range", index));
        };
        let dims = match usize::try_from(dims_len) {
            Ok(0) => &[][..],
            Ok(n) if !dims.is_null() => std::slice::from_raw_parts(dims, n),
            _ => return self.fail("invalid dimension list"),
        };
        if let Some(&d) = dims.iter().find(|&&d| d < 0) {
            return self.fail(format!("dimension {} is not supported", d));
        }

        input.dims = dims.to_vec();
        input.data = None;
        interpreter.allocated = false;
        Status::OK
    }

    unsafe fn allocate_tensors(&self, interpreter: InterpreterHandle) -> Status {
        let interpreter = interp(interpreter);
        interpreter.allocated = false;
        if interpreter.kernel == Kernel::Identity {
            for (input, output) in interpreter.inputs.iter().zip(interpreter.outputs.iter_mut()) {
                output.dims = input.dims.clone();
            }
        }

        for t in interpreter.inputs.iter_mut().chain(&mut interpreter.outputs) {
            t.data = None;
        }

        let total = interpreter
            .inputs
            .iter()
            .chain(&interpreter.outputs)
            .try_fold(0usize, |acc, t| acc.checked_add(t.byte_size()?));
        let Some(total) = total else {
            return self.fail("arena size overflows the address space");
        };
        if let Some(limit) = interpreter.arena_limit {
            if total > limit {
                return self.fail(format!(
                    "arena of {} bytes exceeds limit of {} bytes",
                    total, limit
                ));
            }
        }

        let mut arenas = Vec::with_capacity(interpreter.inputs.len() + interpreter.outputs.len());
        for t in interpreter.inputs.iter().chain(&interpreter.outputs) {
            let len = t.reported_byte_size();
            match reserve_zeroed(len) {
                Some(data) => arenas.push(data),
                None => return self.fail(format!("unable to reserve {} bytes", len)),
            }
        }
        for (t, data) in interpreter
            .inputs
            .iter_mut()
            .chain(&mut interpreter.outputs)
            .zip(arenas)
        {
            t.data = Some(data);
        }
        interpreter.allocated = true;
        Status::OK
    }

    unsafe fn invoke(&self, interpreter: InterpreterHandle) -> Status {
        let interpreter = interp(interpreter);
        if !interpreter.allocated {
            return self.fail("Invoke called on model that is not ready");
        }
        match interpreter.kernel {
            Kernel::Identity => {
                for (input, output) in interpreter.inputs.iter().zip(interpreter.outputs.iter_mut())
                {
                    output.data.clone_from(&input.data);
                }
                Status::OK
            }
            Kernel::Fail => self.fail("kernel reported failure"),
        }
    }

    unsafe fn tensor_type(&self, handle: TensorHandle) -> i32 {
        tensor(handle).tensor_type.code()
    }

    unsafe fn tensor_num_dims(&self, handle: TensorHandle) -> i32 {
        tensor(handle).dims.len() as i32
    }

    unsafe fn tensor_dim(&self, handle: TensorHandle, dim_index: i32) -> i32 {
        usize::try_from(dim_index)
            .ok()
            .and_then(|i| tensor(handle).dims.get(i).copied())
            .unwrap_or(-1)
    }

    unsafe fn tensor_byte_size(&self, handle: TensorHandle) -> usize {
        tensor(handle).reported_byte_size()
    }

    unsafe fn tensor_name(&self, handle: TensorHandle) -> *const c_char {
        tensor(handle).name.as_ptr()
    }

    unsafe fn tensor_copy_from_buffer(
        &self,
        handle: TensorHandle,
        data: *const c_void,
        len: usize,
    ) -> Status {
        let t = tensor(handle);
        if len != t.reported_byte_size() {
            return self.fail("source/destination size mismatch");
        }
        match t.data.as_mut() {
            Some(_) if len == 0 => Status::OK,
            Some(dst) if !data.is_null() => {
                dst.copy_from_slice(std::slice::from_raw_parts(data.cast::<u8>(), len));
                Status::OK
            }
            Some(_) => self.fail("null source buffer"),
            None => self.fail("tensor data is not allocated"),
        }
    }

    unsafe fn tensor_copy_to_buffer(
        &self,
        handle: TensorHandle,
        data: *mut c_void,
        len: usize,
    ) -> Status {
        let t = tensor(handle);
        if len != t.reported_byte_size() {
            return self.fail("source/destination size mismatch");
        }
        match t.data.as_ref() {
            Some(_) if len == 0 => Status::OK,
            Some(src) if !data.is_null() => {
                std::slice::from_raw_parts_mut(data.cast::<u8>(), len).copy_from_slice(src);
                Status::OK
            }
            Some(_) => self.fail("null destination buffer"),
            None => self.fail("tensor data is not allocated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(engine: &ReferenceEngine, spec: &ModelSpec) -> (ModelHandle, InterpreterHandle) {
        let bytes = spec.to_bytes().unwrap();
        unsafe {
            let model = engine.model_create(bytes.as_ptr(), bytes.len());
            assert!(!model.is_null());
            let interpreter = engine.interpreter_create(model, -1);
            assert!(!interpreter.is_null());
            (model, interpreter)
        }
    }

    #[test]
    fn test_model_parse_failures() {
        let engine = ReferenceEngine::new();
        let garbage = [1u8, 2, 3];
        let handle = unsafe { engine.model_create(garbage.as_ptr(), garbage.len()) };
        assert!(handle.is_null());
        assert!(engine.last_error().unwrap().starts_with("unable to parse model"));
        assert_eq!(engine.last_error(), None);

        let mismatched = ModelSpec {
            inputs: vec![TensorSpec::new("x", TensorType::Float32, &[2])],
            outputs: vec![TensorSpec::new("y", TensorType::Int32, &[2])],
            kernel: Kernel::Identity,
            arena_limit: None,
            max_threads: None,
        };
        assert!(ModelSpec::from_bytes(&mismatched.to_bytes().unwrap()).is_err());

        let strings = ModelSpec::identity(TensorType::String, &[1]);
        let err = ModelSpec::from_bytes(&strings.to_bytes().unwrap()).unwrap_err();
        assert!(err.contains("unsupported type String"));
    }

    #[test]
    fn test_model_json_format() {
        let json = br#"{
            "inputs": [{ "name": "in", "type": "UInt8", "shape": [1, 3] }],
            "outputs": [{ "name": "out", "type": "UInt8", "shape": [1, 3] }]
        }"#;
        let spec = ModelSpec::from_bytes(json).unwrap();
        assert_eq!(spec.kernel, Kernel::Identity);
        assert_eq!(spec.inputs[0].tensor_type, TensorType::UInt8);
        assert_eq!(spec.arena_limit, None);
    }

    #[test]
    fn test_identity_lifecycle() {
        let engine = ReferenceEngine::new();
        let (model, interpreter) = create(&engine, &ModelSpec::identity(TensorType::UInt8, &[4]));
        unsafe {
            assert_eq!(engine.invoke(interpreter), Status::ERROR);
            assert_eq!(engine.allocate_tensors(interpreter), Status::OK);

            let input = engine.input_tensor(interpreter, 0);
            let output = engine.output_tensor(interpreter, 0);
            assert!(engine.input_tensor(interpreter, 1).is_null());

            let src = [9u8, 8, 7, 6];
            let status = engine.tensor_copy_from_buffer(input, src.as_ptr().cast(), src.len());
            assert_eq!(status, Status::OK);
            assert_eq!(engine.invoke(interpreter), Status::OK);

            let mut dst = [0u8; 4];
            let status = engine.tensor_copy_to_buffer(output, dst.as_mut_ptr().cast(), dst.len());
            assert_eq!(status, Status::OK);
            assert_eq!(dst, src);

            engine.interpreter_delete(interpreter);
            engine.model_delete(model);
        }
        assert_eq!(engine.live_interpreters(), 0);
        assert_eq!(engine.live_models(), 0);
    }

    #[test]
    fn test_resize_and_arena_limit() {
        let engine = ReferenceEngine::new();
        let spec = ModelSpec::identity(TensorType::Float32, &[1, 2]).with_arena_limit(64);
        let (model, interpreter) = create(&engine, &spec);
        unsafe {
            let negative = [1, -1];
            let status = engine.resize_input_tensor(interpreter, 0, negative.as_ptr(), 2);
            assert_eq!(status, Status::ERROR);

            let big = [4, 4];
            let status = engine.resize_input_tensor(interpreter, 0, big.as_ptr(), 2);
            assert_eq!(status, Status::OK);
            // 2 tensors * 16 floats * 4 bytes = 128 > 64
            assert_eq!(engine.allocate_tensors(interpreter), Status::ERROR);
            assert!(engine.last_error().unwrap().contains("exceeds limit"));

            let small = [2, 2];
            engine.resize_input_tensor(interpreter, 0, small.as_ptr(), 2);
            assert_eq!(engine.allocate_tensors(interpreter), Status::OK);
            let output = engine.output_tensor(interpreter, 0);
            assert_eq!(engine.tensor_byte_size(output), 16);

            engine.interpreter_delete(interpreter);
            engine.model_delete(model);
        }
    }

    #[test]
    fn test_oversized_arena_is_an_error() {
        let engine = ReferenceEngine::new();
        let spec = ModelSpec::identity(TensorType::Float64, &[1]);
        let (model, interpreter) = create(&engine, &spec);
        unsafe {
            let huge = [i32::MAX, i32::MAX, i32::MAX];
            assert_eq!(engine.resize_input_tensor(interpreter, 0, huge.as_ptr(), 3), Status::OK);
            assert_eq!(engine.allocate_tensors(interpreter), Status::ERROR);
            assert!(engine.last_error().unwrap().contains("overflows"));
            let input = engine.input_tensor(interpreter, 0);
            assert_eq!(engine.tensor_byte_size(input), usize::MAX);

            // 16 PiB per tensor: representable, but never reservable
            let wide = [i32::MAX, 1 << 20];
            engine.resize_input_tensor(interpreter, 0, wide.as_ptr(), 2);
            assert_eq!(engine.allocate_tensors(interpreter), Status::ERROR);
            assert!(engine.last_error().unwrap().starts_with("unable to reserve"));
            assert_eq!(engine.invoke(interpreter), Status::ERROR);

            engine.interpreter_delete(interpreter);
            engine.model_delete(model);
        }
    }

    #[test]
    fn test_thread_cap_rejects_interpreter() {
        let engine = ReferenceEngine::new();
        let bytes = ModelSpec::identity(TensorType::UInt8, &[1])
            .with_max_threads(2)
            .to_bytes()
            .unwrap();
        unsafe {
            let model = engine.model_create(bytes.as_ptr(), bytes.len());
            assert!(engine.interpreter_create(model, 4).is_null());
            assert!(engine.last_error().unwrap().contains("at most 2"));
            let interpreter = engine.interpreter_create(model, 2);
            assert!(!interpreter.is_null());
            engine.interpreter_delete(interpreter);
            engine.model_delete(model);
        }
        assert_eq!(engine.live_interpreters(), 0);
    }

    #[test]
    fn test_double_release_is_counted() {
        let engine = ReferenceEngine::new();
        let (model, interpreter) = create(&engine, &ModelSpec::identity(TensorType::Int8, &[1]));
        unsafe {
            engine.interpreter_delete(interpreter);
            engine.interpreter_delete(interpreter);
            engine.model_delete(model);
        }
        assert_eq!(engine.invalid_releases(), 1);
        assert_eq!(engine.live_interpreters(), 0);
    }
}
