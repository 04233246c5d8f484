//! Dynamically typed values exchanged with the host runtime.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::object::HostTensor;
use crate::error::{BridgeError, Result};

/// A value as the host runtime hands it over.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(HostBuffer),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Tensor(HostTensor),
}

impl HostValue {
    /// Host-facing name of the value's kind, used in argument errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Buffer(_) => "Buffer",
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
            Self::Tensor(_) => "Tensor",
        }
    }

    /// Build an `Object` from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&HostBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Self::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Numbers of an `Array`, if every element is a number.
    pub fn as_numbers(&self) -> Option<Vec<f64>> {
        self.as_array()?.iter().map(HostValue::as_number).collect()
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<HostBuffer> for HostValue {
    fn from(buffer: HostBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<HostTensor> for HostValue {
    fn from(tensor: HostTensor) -> Self {
        Self::Tensor(tensor)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        Self::Array(items)
    }
}

/// Fixed-length byte buffer shared with the host.
///
/// Clones share storage, like host references to the same buffer object.
#[derive(Clone, Default)]
pub struct HostBuffer(Rc<RefCell<Box<[u8]>>>);

impl HostBuffer {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(Rc::new(RefCell::new(bytes.into())))
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().to_vec()
    }

    pub(crate) fn read(&self) -> Result<Ref<'_, Box<[u8]>>> {
        self.0
            .try_borrow()
            .map_err(|_| BridgeError::argument("buffer is being written"))
    }

    pub(crate) fn write(&self) -> Result<RefMut<'_, Box<[u8]>>> {
        self.0
            .try_borrow_mut()
            .map_err(|_| BridgeError::argument("buffer is already in use"))
    }
}

impl From<Vec<u8>> for HostBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for HostBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len()).finish()
    }
}
