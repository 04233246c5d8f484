//! Host runtime surface.
//!
//! Models the managed side of the boundary: dynamically typed arguments
//! ([`HostValue`]), shared byte buffers ([`HostBuffer`]) and the two host
//! classes, `Interpreter` and `Tensor`, dispatched by method name.
//!
//! # Example
//!
//! ```ignore
//! use tflite_bridge::host::{HostBuffer, HostInterpreter, HostValue};
//!
//! let model = HostBuffer::from(std::fs::read("model.tflite")?);
//! let options = HostValue::object([("numThreads", HostValue::from(2.0))]);
//! let interpreter = HostInterpreter::construct(&[model.into(), options])?;
//! interpreter.call("allocateTensors", &[])?;
//!
//! let input = interpreter.call("getInputTensor", &[HostValue::from(0.0)])?;
//! let input = input.as_tensor().unwrap();
//! input.call("copyFromBuffer", &[HostBuffer::from(pixels).into()])?;
//! interpreter.call("invoke", &[])?;
//! ```

pub mod marshal;
mod object;
mod value;

pub use object::{HostInterpreter, HostTensor, INTERPRETER_CLASS, TENSOR_CLASS};
pub use value::{HostBuffer, HostValue};
