// src/native/mod.rs
//! Native-function ABI
//!
//! A native function receives the call's arguments as a slice of values and
//! returns exactly one value or a [`NativeFailure`]. The caller performs no
//! coercion, so every native validates its own arguments (see [`Args`]).
//!
//! Each native declares up front whether its failures are catchable or fatal.
//! Catchable failures become `Error` objects returned to the script; fatal
//! failures abort the current invocation with a backtrace.

pub mod args;

use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::runtime::object::{ObjectData, TypeDef};
use crate::runtime::value::{Tag, Value};
use crate::RuntimeError;

pub use args::Args;

/// Signature every native function implements
pub type NativeFn = fn(&[Value]) -> Result<Value, NativeFailure>;

/// How a native's failures reach the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Failures become `Error` objects the script can test for
    Catchable,
    /// Failures terminate the current invocation
    Fatal,
}

/// Failure reported by a native function
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct NativeFailure {
    /// Error category, stored as the `type` field of error objects
    pub kind: String,
    pub message: String,
}

impl NativeFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn arity(function: &str, expected: &str, got: usize) -> Self {
        Self::new(
            "ArityError",
            format!("{function} expected {expected} argument(s), got {got}"),
        )
    }

    pub fn type_error(function: &str, index: usize, expected: Tag, found: Tag) -> Self {
        Self::new(
            "TypeError",
            format!("{function} argument {index} must be {expected}, got {found}"),
        )
    }
}

impl From<RuntimeError> for NativeFailure {
    fn from(err: RuntimeError) -> Self {
        Self::new(err.kind_name(), err.to_string())
    }
}

/// A registered native function
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub mode: FailureMode,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, mode: FailureMode, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            mode,
            func,
        }
    }

    pub fn catchable(name: impl Into<String>, func: NativeFn) -> Self {
        Self::new(name, FailureMode::Catchable, func)
    }

    pub fn fatal(name: impl Into<String>, func: NativeFn) -> Self {
        Self::new(name, FailureMode::Fatal, func)
    }

    /// Call the function and classify the result by its declared mode
    pub fn invoke(&self, args: &[Value]) -> NativeOutcome {
        match (self.func)(args) {
            Ok(value) => NativeOutcome::Value(value),
            Err(failure) => match self.mode {
                FailureMode::Catchable => {
                    debug!(native = %self.name, kind = %failure.kind, "native failure caught");
                    NativeOutcome::Caught(error_object(&failure.message, &failure.kind))
                }
                FailureMode::Fatal => NativeOutcome::Fatal(failure),
            },
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({}, {:?})", self.name, self.mode)
    }
}

/// Result of invoking a native
#[derive(Debug)]
pub enum NativeOutcome {
    /// Successful result
    Value(Value),
    /// Catchable failure, already converted to an error object
    Caught(Value),
    /// Failure of a native declared fatal
    Fatal(NativeFailure),
}

impl NativeOutcome {
    /// Fold into a value, keeping only fatal failures as errors
    pub fn into_result(self) -> Result<Value, NativeFailure> {
        match self {
            NativeOutcome::Value(value) | NativeOutcome::Caught(value) => Ok(value),
            NativeOutcome::Fatal(failure) => Err(failure),
        }
    }
}

/// Build an `Error` object with `message` and `type` fields
pub fn error_object(message: &str, kind: &str) -> Value {
    let mut object = ObjectData::instantiate(&Rc::new(TypeDef::error()));
    object.set("message", Value::string(message));
    object.set("type", Value::string(kind));
    Value::object(object)
}

/// Print a fatal error with its backtrace to standard error and exit
pub fn terminate(error: &RuntimeError) -> ! {
    eprintln!("{error}");
    if let Some(trace) = error.trace() {
        eprintln!("{trace}");
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halve(args: &[Value]) -> Result<Value, NativeFailure> {
        let args = Args::new("halve", args);
        args.expect_count(1)?;
        Ok(Value::number(args.number(0)? / 2.0))
    }

    #[test]
    fn test_success() {
        let native = NativeFunction::catchable("halve", halve);
        match native.invoke(&[Value::number(8.0)]) {
            NativeOutcome::Value(v) => assert_eq!(v, Value::number(4.0)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_catchable_failure_becomes_error_object() {
        let native = NativeFunction::catchable("halve", halve);
        let value = native.invoke(&[Value::string("x")]).into_result().unwrap();

        assert!(value.is_error());
        let object = value.as_object().borrow();
        assert_eq!(object.get("type").unwrap().as_str(), "TypeError");
        assert_eq!(
            object.get("message").unwrap().as_str(),
            "halve argument 0 must be Number, got String"
        );
        assert_eq!(object.keys(), ["message", "type"]);
    }

    #[test]
    fn test_fatal_failure() {
        let native = NativeFunction::fatal("halve", halve);
        match native.invoke(&[]) {
            NativeOutcome::Fatal(failure) => assert_eq!(failure.kind, "ArityError"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_error_object_rendering() {
        let error = error_object("boom", "IOError");
        assert_eq!(
            crate::stringify(&error, true),
            r#"Error { "message": "boom", "type": "IOError" }"#
        );
    }
}
