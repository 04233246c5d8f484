//! Host value ↔ native argument conversion.
//!
//! Every check here runs before the engine is touched. Failures are
//! `Argument` errors, reported through the same channel as engine failures.

use super::value::{HostBuffer, HostValue};
use crate::error::{BridgeError, Result};
use crate::interpreter::InterpreterOptions;

/// Host key for the thread-count option.
pub const NUM_THREADS_KEY: &str = "numThreads";

/// Check that `method` received between `min` and `max` arguments.
pub fn expect_args(method: &str, args: &[HostValue], min: usize, max: usize) -> Result<()> {
    let n = args.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let expected = if min == max {
        format!("{}", min)
    } else {
        format!("{} to {}", min, max)
    };
    Err(BridgeError::argument(format!(
        "{}: {} argument{} expected, got {}",
        method,
        expected,
        if max == 1 { "" } else { "s" },
        n
    )))
}

/// Require a byte buffer.
pub fn to_buffer<'a>(value: &'a HostValue, what: &str) -> Result<&'a HostBuffer> {
    value.as_buffer().ok_or_else(|| {
        BridgeError::argument(format!("{}: Buffer expected, got {}", what, value.kind()))
    })
}

/// Coerce a host number to the engine's 32-bit integer width.
///
/// Truncates toward zero and saturates; NaN becomes 0.
pub fn coerce_i32(n: f64) -> i32 {
    n as i32
}

/// Read interpreter options from an optional options record.
///
/// A missing or `undefined` record means defaults. `numThreads` is optional;
/// non-positive values are kept and later treated as "engine default".
pub fn to_options(value: Option<&HostValue>) -> Result<InterpreterOptions> {
    let fields = match value {
        None | Some(HostValue::Undefined) => return Ok(InterpreterOptions::default()),
        Some(HostValue::Object(fields)) => fields,
        Some(other) => {
            return Err(BridgeError::argument(format!(
                "options: Object expected, got {}",
                other.kind()
            )))
        }
    };

    let num_threads = match fields.get(NUM_THREADS_KEY) {
        None | Some(HostValue::Undefined) => None,
        Some(HostValue::Number(n)) => Some(coerce_i32(*n)),
        Some(other) => {
            return Err(BridgeError::argument(format!(
                "options.{}: number expected, got {}",
                NUM_THREADS_KEY,
                other.kind()
            )))
        }
    };
    Ok(InterpreterOptions { num_threads })
}

/// Require a non-negative integral index.
pub fn to_index(value: &HostValue) -> Result<usize> {
    let n = value.as_number().ok_or_else(|| {
        BridgeError::argument(format!("index: number expected, got {}", value.kind()))
    })?;
    if !n.is_finite() || n.fract() != 0.0 || n < 0.0 || n > i32::MAX as f64 {
        return Err(BridgeError::argument(format!(
            "index: non-negative integer expected, got {}",
            n
        )));
    }
    Ok(n as usize)
}

/// Convert an array of integers into a contiguous dimension list.
///
/// Values are not range-checked beyond fitting an `i32`: negative entries
/// reach the engine, which decides whether it supports them.
pub fn to_dims(value: &HostValue) -> Result<Vec<i32>> {
    let items = value.as_array().ok_or_else(|| {
        BridgeError::argument(format!("dims: Array expected, got {}", value.kind()))
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            HostValue::Number(n)
                if n.is_finite()
                    && n.fract() == 0.0
                    && *n >= i32::MIN as f64
                    && *n <= i32::MAX as f64 =>
            {
                Ok(*n as i32)
            }
            other => Err(BridgeError::argument(format!(
                "dims[{}]: integer expected, got {}",
                i,
                describe(other)
            ))),
        })
        .collect()
}

/// Counts and sizes as host numbers.
pub fn from_usize(n: usize) -> HostValue {
    HostValue::Number(n as f64)
}

/// A shape as an array of host numbers.
pub fn from_dims(dims: &[usize]) -> HostValue {
    HostValue::Array(dims.iter().map(|&d| from_usize(d)).collect())
}

fn describe(value: &HostValue) -> String {
    match value {
        HostValue::Number(n) => n.to_string(),
        other => other.kind().to_string(),
    }
}
