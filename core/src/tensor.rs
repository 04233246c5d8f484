//! Tensor views into an interpreter's arena.
//!
//! A [`TensorView`] never owns anything. It borrows the [`Interpreter`] it
//! came from, so it cannot be used after the interpreter is closed or after a
//! call that may move the arena (resize, allocate, invoke all take
//! `&mut Interpreter`).

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;
use std::str::FromStr;

use crate::engine::TensorHandle;
use crate::error::{BridgeError, Operation, Result};
use crate::interpreter::Interpreter;

/// Element type of a tensor (`TfLiteType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorType {
    NoType,
    Float32,
    Int32,
    UInt8,
    Int64,
    String,
    Bool,
    Int16,
    Complex64,
    Int8,
    Float16,
    Float64,
    Complex128,
    UInt64,
    UInt32,
    UInt16,
}

impl TensorType {
    const ALL: [TensorType; 16] = [
        Self::NoType,
        Self::Float32,
        Self::Int32,
        Self::UInt8,
        Self::Int64,
        Self::String,
        Self::Bool,
        Self::Int16,
        Self::Complex64,
        Self::Int8,
        Self::Float16,
        Self::Float64,
        Self::Complex128,
        Self::UInt64,
        Self::UInt32,
        Self::UInt16,
    ];

    /// Engine enum code.
    pub fn code(self) -> i32 {
        match self {
            Self::NoType => 0,
            Self::Float32 => 1,
            Self::Int32 => 2,
            Self::UInt8 => 3,
            Self::Int64 => 4,
            Self::String => 5,
            Self::Bool => 6,
            Self::Int16 => 7,
            Self::Complex64 => 8,
            Self::Int8 => 9,
            Self::Float16 => 10,
            Self::Float64 => 11,
            Self::Complex128 => 12,
            Self::UInt64 => 13,
            Self::UInt32 => 16,
            Self::UInt16 => 17,
        }
    }

    /// Map an engine enum code back to a type. Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Width of one element in bytes, for fixed-width types.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            Self::NoType | Self::String => None,
            Self::UInt8 | Self::Int8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 | Self::Float16 => Some(2),
            Self::Float32 | Self::Int32 | Self::UInt32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoType => "NoType",
            Self::Float32 => "Float32",
            Self::Int32 => "Int32",
            Self::UInt8 => "UInt8",
            Self::Int64 => "Int64",
            Self::String => "String",
            Self::Bool => "Bool",
            Self::Int16 => "Int16",
            Self::Complex64 => "Complex64",
            Self::Int8 => "Int8",
            Self::Float16 => "Float16",
            Self::Float64 => "Float64",
            Self::Complex128 => "Complex128",
            Self::UInt64 => "UInt64",
            Self::UInt32 => "UInt32",
            Self::UInt16 => "UInt16",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TensorType {
    type Err = BridgeError;

    /// Parse a type name like "Float32" or "uint8" (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BridgeError::argument(format!("Unknown tensor type: {}", s)))
    }
}

/// Which side of the interpreter a tensor belongs to, and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorSlot {
    Input(usize),
    Output(usize),
}

impl fmt::Display for TensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "input {}", i),
            Self::Output(i) => write!(f, "output {}", i),
        }
    }
}

/// Rust element types that map onto a fixed-width [`TensorType`].
pub trait Element: Copy + 'static {
    const TYPE: TensorType;
    const SIZE: usize;

    fn write_ne(self, out: &mut Vec<u8>);
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: TensorType = TensorType::$variant;
            const SIZE: usize = std::mem::size_of::<$t>();

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(i32, Int32);
impl_element!(u8, UInt8);
impl_element!(i64, Int64);
impl_element!(i16, Int16);
impl_element!(i8, Int8);
impl_element!(u64, UInt64);
impl_element!(u32, UInt32);
impl_element!(u16, UInt16);

/// Non-owning view of one tensor inside an interpreter's arena.
///
/// Views are cheap and are not cached: every
/// [`Interpreter::input_tensor`] call returns a fresh one.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    interpreter: &'a Interpreter,
    slot: TensorSlot,
    handle: TensorHandle,
}

impl<'a> TensorView<'a> {
    /// The caller guarantees `handle` is the non-null tensor for `slot` in
    /// `interpreter`'s current arena.
    pub(crate) fn new(interpreter: &'a Interpreter, slot: TensorSlot, handle: TensorHandle) -> Self {
        Self {
            interpreter,
            slot,
            handle,
        }
    }

    /// Where this tensor sits in the interpreter.
    pub fn slot(&self) -> TensorSlot {
        self.slot
    }

    /// Element type. Codes the bridge does not know are reported as `NoType`.
    pub fn tensor_type(&self) -> TensorType {
        let code = unsafe { self.interpreter.engine().tensor_type(self.handle) };
        TensorType::from_code(code).unwrap_or_else(|| {
            tracing::warn!(code, slot = %self.slot, "unknown tensor type code");
            TensorType::NoType
        })
    }

    /// Tensor name as recorded in the model.
    pub fn name(&self) -> Cow<'a, str> {
        let ptr = unsafe { self.interpreter.engine().tensor_name(self.handle) };
        if ptr.is_null() {
            Cow::Borrowed("")
        } else {
            // SAFETY: the engine keeps the name alive as long as the tensor,
            // which outlives 'a.
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
        }
    }

    /// Number of dimensions.
    pub fn num_dims(&self) -> usize {
        let n = unsafe { self.interpreter.engine().tensor_num_dims(self.handle) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Shape, outermost dimension first.
    pub fn dims(&self) -> Vec<usize> {
        let engine = self.interpreter.engine();
        (0..self.num_dims())
            .map(|i| {
                let d = unsafe { engine.tensor_dim(self.handle, i as i32) };
                usize::try_from(d).unwrap_or(0)
            })
            .collect()
    }

    /// Size of the tensor's data region in bytes.
    pub fn byte_size(&self) -> usize {
        unsafe { self.interpreter.engine().tensor_byte_size(self.handle) }
    }

    /// Copy `buffer` into the tensor.
    ///
    /// `buffer.len()` must equal [`byte_size`](Self::byte_size) and tensors
    /// must be allocated; otherwise nothing is written.
    pub fn copy_from_buffer(&self, buffer: &[u8]) -> Result<()> {
        self.check_copy(Operation::CopyFromBuffer, buffer.len())?;
        let engine = self.interpreter.engine();
        let status = unsafe {
            engine.tensor_copy_from_buffer(self.handle, buffer.as_ptr().cast(), buffer.len())
        };
        self.interpreter.check(Operation::CopyFromBuffer, status)
    }

    /// Copy the tensor's contents into `buffer`. Same rules as
    /// [`copy_from_buffer`](Self::copy_from_buffer).
    pub fn copy_to_buffer(&self, buffer: &mut [u8]) -> Result<()> {
        self.check_copy(Operation::CopyToBuffer, buffer.len())?;
        let engine = self.interpreter.engine();
        let status = unsafe {
            engine.tensor_copy_to_buffer(self.handle, buffer.as_mut_ptr().cast(), buffer.len())
        };
        self.interpreter.check(Operation::CopyToBuffer, status)
    }

    /// Copy a typed array into the tensor, in logical (row-major) order.
    pub fn copy_from_array<T, S, D>(&self, array: &ArrayBase<S, D>) -> Result<()>
    where
        T: Element,
        S: Data<Elem = T>,
        D: Dimension,
    {
        self.check_element::<T>()?;
        let mut bytes = Vec::with_capacity(array.len() * T::SIZE);
        for &value in array.iter() {
            value.write_ne(&mut bytes);
        }
        self.copy_from_buffer(&bytes)
    }

    /// Read the tensor into an owned array shaped like [`dims`](Self::dims).
    pub fn to_array<T: Element>(&self) -> Result<ArrayD<T>> {
        self.check_element::<T>()?;
        let mut bytes = vec![0u8; self.byte_size()];
        self.copy_to_buffer(&mut bytes)?;
        let data: Vec<T> = bytes.chunks_exact(T::SIZE).map(T::read_ne).collect();
        ArrayD::from_shape_vec(IxDyn(&self.dims()), data)
            .map_err(|e| BridgeError::copy(format!("Array shape error: {}", e)))
    }

    fn check_copy(&self, op: Operation, len: usize) -> Result<()> {
        let expected = self.byte_size();
        if len != expected {
            return Err(BridgeError::copy(format!(
                "{} failed: source/destination size mismatch ({} bytes given, {} expects {})",
                op, len, self.slot, expected
            )));
        }
        if !self.interpreter.is_allocated() {
            return Err(BridgeError::copy(format!(
                "{} failed: tensors are not allocated; call allocate_tensors() first",
                op
            )));
        }
        Ok(())
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        let actual = self.tensor_type();
        if actual != T::TYPE {
            return Err(BridgeError::copy(format!(
                "{} holds {} elements, not {}",
                self.slot,
                actual,
                T::TYPE
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("slot", &self.slot)
            .field("name", &self.name())
            .field("type", &self.tensor_type())
            .field("dims", &self.dims())
            .field("byte_size", &self.byte_size())
            .finish()
    }
}
