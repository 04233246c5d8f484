//! Host-visible `Interpreter` and `Tensor` objects.
//!
//! The host owns [`HostInterpreter`] references and frees them on its own
//! schedule. [`HostTensor`] objects only keep a weak reference plus the arena
//! epoch they were created in, and re-resolve the native tensor on every
//! call. A tensor whose interpreter is gone, or whose arena was reallocated
//! since, reports a `Released` error instead of reading freed memory.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::{debug, warn};

use super::marshal;
use super::value::HostValue;
use crate::engine::{self, Engine};
use crate::error::{BridgeError, Result};
use crate::interpreter::Interpreter;
use crate::tensor::{TensorSlot, TensorView};

/// Host class name of [`HostInterpreter`].
pub const INTERPRETER_CLASS: &str = "Interpreter";

/// Host class name of [`HostTensor`].
pub const TENSOR_CLASS: &str = "Tensor";

/// Host-side interpreter object.
///
/// Clones refer to the same native interpreter.
#[derive(Debug, Clone)]
pub struct HostInterpreter {
    inner: Rc<RefCell<Interpreter>>,
}

impl HostInterpreter {
    /// Instance methods exposed to the host.
    pub const METHODS: &'static [&'static str] = &[
        "getInputTensorCount",
        "getInputTensor",
        "resizeInputTensor",
        "allocateTensors",
        "invoke",
        "getOutputTensorCount",
        "getOutputTensor",
    ];

    /// `new Interpreter(modelBuffer, options?)` on the default engine.
    pub fn construct(args: &[HostValue]) -> Result<Self> {
        Self::construct_with_engine(engine::default_engine(), args)
    }

    /// `new Interpreter(modelBuffer, options?)` on `engine`.
    ///
    /// All arguments are validated before the engine is called.
    pub fn construct_with_engine(engine: Arc<dyn Engine>, args: &[HostValue]) -> Result<Self> {
        marshal::expect_args(INTERPRETER_CLASS, args, 1, 2)?;
        let buffer = marshal::to_buffer(&args[0], "model")?;
        let options = marshal::to_options(args.get(1))?;

        let bytes = buffer.read()?;
        let interpreter = Interpreter::with_engine(engine, &bytes, &options)?;
        Ok(Self::from_interpreter(interpreter))
    }

    /// Expose an existing interpreter to the host.
    pub fn from_interpreter(interpreter: Interpreter) -> Self {
        Self {
            inner: Rc::new(RefCell::new(interpreter)),
        }
    }

    /// Dispatch a host method call.
    pub fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue> {
        match method {
            "getInputTensorCount" => {
                marshal::expect_args(method, args, 0, 0)?;
                Ok(marshal::from_usize(self.borrow()?.input_tensor_count()))
            }
            "getOutputTensorCount" => {
                marshal::expect_args(method, args, 0, 0)?;
                Ok(marshal::from_usize(self.borrow()?.output_tensor_count()))
            }
            "getInputTensor" => {
                marshal::expect_args(method, args, 1, 1)?;
                let index = marshal::to_index(&args[0])?;
                self.tensor(TensorSlot::Input(index)).map(HostValue::Tensor)
            }
            "getOutputTensor" => {
                marshal::expect_args(method, args, 1, 1)?;
                let index = marshal::to_index(&args[0])?;
                self.tensor(TensorSlot::Output(index)).map(HostValue::Tensor)
            }
            "resizeInputTensor" => {
                marshal::expect_args(method, args, 2, 2)?;
                let index = marshal::to_index(&args[0])?;
                let dims = marshal::to_dims(&args[1])?;
                self.borrow_mut()?.resize_input_tensor(index, &dims)?;
                Ok(HostValue::Undefined)
            }
            "allocateTensors" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.borrow_mut()?.allocate_tensors()?;
                Ok(HostValue::Undefined)
            }
            "invoke" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.borrow_mut()?.invoke()?;
                Ok(HostValue::Undefined)
            }
            _ => Err(BridgeError::argument(format!(
                "{} has no method '{}'",
                INTERPRETER_CLASS, method
            ))),
        }
    }

    /// Create a host tensor for `slot`. The index is validated now; the
    /// native tensor is resolved again on every later call.
    pub fn tensor(&self, slot: TensorSlot) -> Result<HostTensor> {
        let interpreter = self.borrow()?;
        interpreter.tensor(slot)?;
        Ok(HostTensor {
            interpreter: Rc::downgrade(&self.inner),
            slot,
            epoch: interpreter.arena_epoch(),
        })
    }

    /// All input tensors, in order.
    pub fn inputs(&self) -> Result<Vec<HostTensor>> {
        let count = self.borrow()?.input_tensor_count();
        (0..count).map(|i| self.tensor(TensorSlot::Input(i))).collect()
    }

    /// All output tensors, in order.
    pub fn outputs(&self) -> Result<Vec<HostTensor>> {
        let count = self.borrow()?.output_tensor_count();
        (0..count).map(|i| self.tensor(TensorSlot::Output(i))).collect()
    }

    /// Whether tensors are currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.inner
            .try_borrow()
            .map(|i| i.is_allocated())
            .unwrap_or(false)
    }

    /// Host finalizer hook: release the native interpreter now.
    ///
    /// Idempotent. Outstanding host tensors report `Released` afterwards.
    pub fn finalize(&self) {
        match self.inner.try_borrow_mut() {
            Ok(mut interpreter) => {
                debug!("finalizing host interpreter");
                interpreter.close();
            }
            Err(_) => warn!("finalize skipped: interpreter is in use"),
        }
    }

    fn borrow(&self) -> Result<Ref<'_, Interpreter>> {
        self.inner
            .try_borrow()
            .map_err(|_| BridgeError::argument("interpreter is already in use"))
    }

    fn borrow_mut(&self) -> Result<RefMut<'_, Interpreter>> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| BridgeError::argument("interpreter is already in use"))
    }
}

/// Host-side tensor object.
#[derive(Debug, Clone)]
pub struct HostTensor {
    interpreter: Weak<RefCell<Interpreter>>,
    slot: TensorSlot,
    epoch: u64,
}

impl HostTensor {
    /// Instance methods exposed to the host.
    pub const METHODS: &'static [&'static str] = &[
        "type",
        "name",
        "dims",
        "byteSize",
        "copyFromBuffer",
        "copyToBuffer",
    ];

    pub fn slot(&self) -> TensorSlot {
        self.slot
    }

    /// True when a call on this tensor cannot succeed now. A mutably
    /// borrowed interpreter counts as stale until the borrow ends.
    pub fn is_stale(&self) -> bool {
        match self.interpreter.upgrade() {
            Some(rc) => rc
                .try_borrow()
                .map(|i| i.is_closed() || i.arena_epoch() != self.epoch)
                .unwrap_or(true),
            None => true,
        }
    }

    /// Dispatch a host method call.
    pub fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue> {
        match method {
            "type" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.with_view(|v| Ok(HostValue::String(v.tensor_type().to_string())))
            }
            "name" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.with_view(|v| Ok(HostValue::String(v.name().into_owned())))
            }
            "dims" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.with_view(|v| Ok(marshal::from_dims(&v.dims())))
            }
            "byteSize" => {
                marshal::expect_args(method, args, 0, 0)?;
                self.with_view(|v| Ok(marshal::from_usize(v.byte_size())))
            }
            "copyFromBuffer" => {
                marshal::expect_args(method, args, 1, 1)?;
                let buffer = marshal::to_buffer(&args[0], method)?;
                let bytes = buffer.read()?;
                self.with_view(|v| v.copy_from_buffer(&bytes))?;
                Ok(HostValue::Undefined)
            }
            "copyToBuffer" => {
                marshal::expect_args(method, args, 1, 1)?;
                let buffer = marshal::to_buffer(&args[0], method)?;
                let mut bytes = buffer.write()?;
                self.with_view(|v| v.copy_to_buffer(&mut bytes))?;
                Ok(HostValue::Undefined)
            }
            _ => Err(BridgeError::argument(format!(
                "{} has no method '{}'",
                TENSOR_CLASS, method
            ))),
        }
    }

    fn with_view<T>(&self, f: impl FnOnce(TensorView<'_>) -> Result<T>) -> Result<T> {
        let rc = self
            .interpreter
            .upgrade()
            .ok_or_else(|| BridgeError::released("interpreter has been destroyed"))?;
        let interpreter = rc
            .try_borrow()
            .map_err(|_| BridgeError::argument("interpreter is already in use"))?;
        if interpreter.is_closed() {
            return Err(BridgeError::released("interpreter has been destroyed"));
        }
        if interpreter.arena_epoch() != self.epoch {
            return Err(BridgeError::released(format!(
                "{} view is stale: tensors were resized or reallocated after it was obtained",
                self.slot
            )));
        }
        let view = interpreter.tensor(self.slot)?;
        f(view)
    }
}
