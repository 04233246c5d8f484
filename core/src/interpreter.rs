//! Safe owner of a native interpreter.
//!
//! [`Interpreter`] binds the native model, the native interpreter and the
//! model bytes they were built from to one Rust value. Everything is
//! released exactly once, either by [`Interpreter::close`] or on drop.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{self, Engine, InterpreterHandle, ModelHandle, Status, TensorHandle};
use crate::error::{BridgeError, Operation, Result};
use crate::tensor::{TensorSlot, TensorView};

/// Interpreter construction options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InterpreterOptions {
    /// Upper bound on the engine's compute threads during `invoke`.
    /// `None` or a value `<= 0` selects the engine default.
    #[serde(default, alias = "numThreads")]
    pub num_threads: Option<i32>,
}

impl InterpreterOptions {
    pub fn with_num_threads(mut self, num_threads: i32) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Thread count as passed to the engine; `-1` means engine default.
    pub fn effective_num_threads(&self) -> i32 {
        match self.num_threads {
            Some(n) if n > 0 => n,
            _ => -1,
        }
    }
}

/// Owned copy of the model bytes.
///
/// Engines may keep pointers into the buffer handed to `CreateModel`, so the
/// bytes live as long as the interpreter that was built from them.
pub struct ModelBuffer {
    bytes: Box<[u8]>,
}

impl ModelBuffer {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ModelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBuffer").field("len", &self.len()).finish()
    }
}

/// Lifecycle state of an [`Interpreter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    /// Built, or resized since the last allocation; tensors need allocating.
    Constructed,
    TensorsAllocated,
    Invoked,
    Destroyed,
}

/// A loaded model and its native interpreter.
///
/// Calls must be serialized by the caller: the type is `Send` but not
/// `Sync`, and no locking happens inside.
///
/// # Example
///
/// ```ignore
/// use tflite_bridge::{Interpreter, InterpreterOptions};
///
/// let model = std::fs::read("mobilenet.tflite")?;
/// let mut interpreter = Interpreter::new(&model, &InterpreterOptions::default())?;
/// interpreter.allocate_tensors()?;
/// interpreter.input_tensor(0)?.copy_from_buffer(&image)?;
/// interpreter.invoke()?;
/// let scores = interpreter.output_tensor(0)?.to_array::<u8>()?;
/// ```
pub struct Interpreter {
    engine: Arc<dyn Engine>,
    handle: InterpreterHandle,
    model: ModelHandle,
    buffer: ModelBuffer,
    state: InterpreterState,
    arena_epoch: u64,
}

// SAFETY: the interpreter exclusively owns its native handles and the engine
// is Send + Sync; nothing is tied to the creating thread.
unsafe impl Send for Interpreter {}

impl Interpreter {
    /// Create an interpreter on the default engine.
    pub fn new(model_bytes: &[u8], options: &InterpreterOptions) -> Result<Self> {
        Self::with_engine(engine::default_engine(), model_bytes, options)
    }

    /// Create an interpreter on a specific engine.
    ///
    /// # Errors
    ///
    /// `Argument` if `model_bytes` is empty; `Construction` if the engine
    /// cannot parse the model or build an interpreter. No native resource
    /// survives a failed construction.
    pub fn with_engine(
        engine: Arc<dyn Engine>,
        model_bytes: &[u8],
        options: &InterpreterOptions,
    ) -> Result<Self> {
        if model_bytes.is_empty() {
            return Err(BridgeError::argument("model buffer is empty"));
        }
        let buffer = ModelBuffer::new(model_bytes);
        let num_threads = options.effective_num_threads();

        let model = unsafe { engine.model_create(buffer.as_bytes().as_ptr(), buffer.len()) };
        if model.is_null() {
            return Err(translate(engine.as_ref(), Operation::CreateModel, None));
        }

        let handle = unsafe { engine.interpreter_create(model, num_threads) };
        if handle.is_null() {
            let err = translate(engine.as_ref(), Operation::CreateInterpreter, None);
            unsafe { engine.model_delete(model) };
            return Err(err);
        }

        let interpreter = Self {
            engine,
            handle,
            model,
            buffer,
            state: InterpreterState::Constructed,
            arena_epoch: 0,
        };
        info!(
            engine = interpreter.engine.name(),
            version = %interpreter.engine.version(),
            model_bytes = interpreter.buffer.len(),
            num_threads,
            inputs = interpreter.input_tensor_count(),
            outputs = interpreter.output_tensor_count(),
            "interpreter created"
        );
        Ok(interpreter)
    }

    /// Read a model file and create an interpreter on the default engine.
    pub fn from_file(path: impl AsRef<Path>, options: &InterpreterOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BridgeError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        debug!(path = %path.display(), "loaded model file");
        Self::new(&bytes, options)
    }

    /// Create an interpreter from `model.path` and `interpreter` in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config
            .model
            .path
            .as_ref()
            .ok_or_else(|| BridgeError::config("model.path is not set"))?;
        Self::from_file(path, &config.interpreter)
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// True once `allocate_tensors` succeeded and no resize happened since.
    pub fn is_allocated(&self) -> bool {
        matches!(
            self.state,
            InterpreterState::TensorsAllocated | InterpreterState::Invoked
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state == InterpreterState::Destroyed
    }

    /// Counter that changes whenever previously obtained tensor handles may
    /// have become invalid (resize, allocation, close).
    pub fn arena_epoch(&self) -> u64 {
        self.arena_epoch
    }

    /// The retained model bytes.
    pub fn model_buffer(&self) -> &ModelBuffer {
        &self.buffer
    }

    /// Number of input tensors; 0 once closed.
    pub fn input_tensor_count(&self) -> usize {
        match self.live() {
            Ok(handle) => count(unsafe { self.engine.input_tensor_count(handle) }),
            Err(_) => 0,
        }
    }

    /// Number of output tensors; 0 once closed.
    pub fn output_tensor_count(&self) -> usize {
        match self.live() {
            Ok(handle) => count(unsafe { self.engine.output_tensor_count(handle) }),
            Err(_) => 0,
        }
    }

    pub fn input_tensor(&self, index: usize) -> Result<TensorView<'_>> {
        self.tensor(TensorSlot::Input(index))
    }

    pub fn output_tensor(&self, index: usize) -> Result<TensorView<'_>> {
        self.tensor(TensorSlot::Output(index))
    }

    /// All input views, in order.
    pub fn inputs(&self) -> Result<Vec<TensorView<'_>>> {
        (0..self.input_tensor_count())
            .map(|i| self.input_tensor(i))
            .collect()
    }

    /// All output views, in order.
    pub fn outputs(&self) -> Result<Vec<TensorView<'_>>> {
        (0..self.output_tensor_count())
            .map(|i| self.output_tensor(i))
            .collect()
    }

    /// Resolve a slot to a fresh view.
    pub fn tensor(&self, slot: TensorSlot) -> Result<TensorView<'_>> {
        let handle = self.live()?;
        let (index, count) = match slot {
            TensorSlot::Input(i) => (i, self.input_tensor_count()),
            TensorSlot::Output(i) => (i, self.output_tensor_count()),
        };
        if index >= count {
            return Err(BridgeError::argument(format!(
                "{} out of range (interpreter has {})",
                slot, count
            )));
        }

        let index = index as i32;
        let tensor: TensorHandle = unsafe {
            match slot {
                TensorSlot::Input(_) => self.engine.input_tensor(handle, index),
                TensorSlot::Output(_) => self.engine.output_tensor(handle, index),
            }
        };
        if tensor.is_null() {
            return Err(BridgeError::argument(format!(
                "engine returned no tensor for {}",
                slot
            )));
        }
        Ok(TensorView::new(self, slot, tensor))
    }

    /// Request a new shape for an input. Takes effect at the next
    /// [`allocate_tensors`](Self::allocate_tensors).
    ///
    /// Dimensions are forwarded to the engine as given.
    pub fn resize_input_tensor(&mut self, index: usize, dims: &[i32]) -> Result<()> {
        let handle = self.live()?;
        let count = self.input_tensor_count();
        if index >= count {
            return Err(BridgeError::argument(format!(
                "input {} out of range (interpreter has {})",
                index, count
            )));
        }
        let dims_len = i32::try_from(dims.len())
            .map_err(|_| BridgeError::argument("too many dimensions"))?;

        debug!(index, ?dims, "resizing input tensor");
        self.arena_epoch += 1;
        let status = unsafe {
            self.engine
                .resize_input_tensor(handle, index as i32, dims.as_ptr(), dims_len)
        };
        self.check(Operation::ResizeInputTensor, status)?;
        self.state = InterpreterState::Constructed;
        Ok(())
    }

    /// Reserve arena memory for the current shapes.
    ///
    /// Invalidates every tensor handle obtained before the call.
    pub fn allocate_tensors(&mut self) -> Result<()> {
        let handle = self.live()?;
        debug!("allocating tensors");
        self.arena_epoch += 1;
        let status = unsafe { self.engine.allocate_tensors(handle) };
        if let Err(err) = self.check(Operation::AllocateTensors, status) {
            self.state = InterpreterState::Constructed;
            return Err(err);
        }
        self.state = InterpreterState::TensorsAllocated;
        Ok(())
    }

    /// Run the model. Input completeness is not checked here; only failures
    /// the engine reports are surfaced.
    pub fn invoke(&mut self) -> Result<()> {
        let handle = self.live()?;
        debug!(state = ?self.state, "invoking");
        let status = unsafe { self.engine.invoke(handle) };
        self.check(Operation::Invoke, status)?;
        self.state = InterpreterState::Invoked;
        Ok(())
    }

    /// Release the native interpreter and model.
    ///
    /// Safe to call more than once; later calls do nothing. Every other
    /// operation fails with a `Released` error afterwards.
    pub fn close(&mut self) {
        if self.handle.is_null() && self.model.is_null() {
            return;
        }
        unsafe {
            if !self.handle.is_null() {
                self.engine.interpreter_delete(self.handle);
            }
            if !self.model.is_null() {
                self.engine.model_delete(self.model);
            }
        }
        self.handle = ptr::null_mut();
        self.model = ptr::null_mut();
        self.state = InterpreterState::Destroyed;
        self.arena_epoch += 1;
        info!(engine = self.engine.name(), "interpreter released");
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Translate a native status for `op`.
    pub(crate) fn check(&self, op: Operation, status: Status) -> Result<()> {
        if status.is_ok() {
            Ok(())
        } else {
            Err(translate(self.engine.as_ref(), op, Some(status)))
        }
    }

    fn live(&self) -> Result<InterpreterHandle> {
        if self.handle.is_null() {
            Err(BridgeError::released("interpreter has been destroyed"))
        } else {
            Ok(self.handle)
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("arena_epoch", &self.arena_epoch)
            .field("model", &self.buffer)
            .finish()
    }
}

fn count(n: i32) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn translate(engine: &dyn Engine, op: Operation, status: Option<Status>) -> BridgeError {
    let err = BridgeError::native(op, status, engine.last_error());
    warn!(kind = %err.kind(), engine = engine.name(), "{}", err);
    err
}
