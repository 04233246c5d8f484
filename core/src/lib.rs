//! tflite-bridge: a safe host boundary for the TensorFlow Lite C API.
//!
//! This crate owns the native resources a host runtime needs to run a
//! TensorFlow Lite model (the model bytes, the native model and the native
//! interpreter) and hands out non-owning views into the interpreter's tensor
//! arena. Native status codes and malformed host arguments are translated
//! into one error type, [`BridgeError`].
//!
//! # Features
//!
//! - **tflite**: link `libtensorflowlite_c` and make [`engine::TfLiteEngine`]
//!   the default engine. Without it the in-process
//!   [`engine::ReferenceEngine`] is used.
//!
//! # Example
//!
//! ```ignore
//! use tflite_bridge::{Interpreter, InterpreterOptions};
//!
//! let options = InterpreterOptions::default().with_num_threads(2);
//! let mut interpreter = Interpreter::from_file("mobilenet_v1_1.0_224_quant.tflite", &options)?;
//! interpreter.allocate_tensors()?;
//!
//! let input = interpreter.input_tensor(0)?;
//! assert_eq!(input.dims(), vec![1, 224, 224, 3]);
//! input.copy_from_buffer(&pixels)?;
//!
//! interpreter.invoke()?;
//! let mut scores = vec![0u8; 1001];
//! interpreter.output_tensor(0)?.copy_to_buffer(&mut scores)?;
//! ```
//!
//! # Building
//!
//! ```bash
//! # Reference engine only
//! cargo build --release
//!
//! # Against a prebuilt TensorFlow Lite C library
//! TFLITE_LIB_DIR=/opt/tflite/lib cargo build --release --features tflite
//!
//! # Building TensorFlow Lite from a source checkout
//! TFLITE_SOURCE_DIR=~/src/tensorflow cargo build --release --features tflite
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod tensor;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, ErrorKind, Result};
pub use interpreter::{Interpreter, InterpreterOptions, InterpreterState, ModelBuffer};
pub use tensor::{Element, TensorSlot, TensorType, TensorView};
