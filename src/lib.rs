// src/lib.rs
//! # Dynamic Runtime Core
//!
//! Value model and execution context for a dynamically typed, bytecode
//! interpreted scripting language: tagged reference-counted values, closure
//! cells, call frames, resumable generators, an import cache and the ABI
//! native functions are written against.
//!
//! ## Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use dyn_runtime::{Chunk, FunctionObj, Value, Vm};
//!
//! let mut chunk = Chunk::new();
//! chunk.add_variable("count");
//! let counter = Rc::new(RefCell::new(FunctionObj::new("counter", chunk)));
//! let closure = Rc::new(RefCell::new(FunctionObj::new("bump", Chunk::new())));
//!
//! let mut vm = Vm::new();
//! vm.call(&counter, vec![]).unwrap();
//! vm.set_local(0, Value::number(1.0)).unwrap();
//! let cell = vm.capture(&closure, "count", 0).unwrap();
//! vm.ret(Value::none()).unwrap();
//!
//! // the frame is gone; the closure keeps the last value
//! assert_eq!(vm.read_capture(&cell).unwrap(), Value::number(1.0));
//! ```

pub mod config;
pub mod module;
pub mod native;
pub mod runtime;

use thiserror::Error;

pub use config::VmConfig;
pub use module::{ImportCache, ModuleEntry};
pub use native::{
    error_object, Args, FailureMode, NativeFailure, NativeFn, NativeFunction, NativeOutcome,
};
pub use runtime::closure::ClosureCell;
pub use runtime::frame::{CallFrame, FrameId, StackTrace, TraceFrame, TryHandler};
pub use runtime::function::{Chunk, Constant, FunctionObj};
pub use runtime::generator::GeneratorState;
pub use runtime::object::{ForeignHandle, ObjectData, TypeDef};
pub use runtime::stringify::{format_number, stringify};
pub use runtime::value::{FunctionRef, Payload, Tag, Value, ValueFlags};
pub use runtime::vm::Vm;

/// Errors raised by the runtime core
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("Stack overflow: call depth exceeded {limit}")]
    StackOverflow { limit: usize, trace: StackTrace },

    #[error("{name} expected {min} to {max} argument(s), got {got}")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("Type mismatch: expected {expected}, got {found}")]
    TagMismatch { expected: Tag, found: Tag },

    #[error("Cannot reassign constant '{name}'")]
    ConstReassignment { name: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Generator '{name}' is exhausted")]
    GeneratorExhausted { name: String },

    #[error("Generator '{name}' is already running")]
    GeneratorRunning { name: String },

    #[error("'{name}' is not a generator")]
    NotAGenerator { name: String },

    #[error("Yield outside of a generator")]
    NotInGenerator,

    #[error("No active call frame")]
    NoActiveFrame,

    #[error("Invalid local slot {slot}")]
    InvalidSlot { slot: usize },

    #[error("Captured variable refers to frame #{frame}, which no longer exists")]
    DanglingCapture { frame: u64 },

    #[error("Frame stack fell below entry depth {expected} (now {found})")]
    FrameUnderflow { expected: usize, found: usize },

    #[error("Pointer owned by '{found}' used where '{expected}' was expected")]
    PointerOwnerMismatch { expected: String, found: String },

    #[error("Fatal error: {message}")]
    Fatal { message: String, trace: StackTrace },

    #[error("Uncaught error: {message}")]
    Uncaught { message: String, trace: StackTrace },
}

impl RuntimeError {
    /// Whether a script-level `try` may intercept this error
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::StackOverflow { .. }
                | RuntimeError::Fatal { .. }
                | RuntimeError::Uncaught { .. }
        )
    }

    /// Category stored in the `type` field of error objects
    pub fn kind_name(&self) -> &'static str {
        match self {
            RuntimeError::StackOverflow { .. } => "StackOverflowError",
            RuntimeError::Arity { .. } => "ArityError",
            RuntimeError::TagMismatch { .. } | RuntimeError::PointerOwnerMismatch { .. } => {
                "TypeError"
            }
            RuntimeError::ConstReassignment { .. } => "ConstError",
            RuntimeError::UndefinedVariable(_) => "NameError",
            RuntimeError::GeneratorExhausted { .. }
            | RuntimeError::GeneratorRunning { .. }
            | RuntimeError::NotAGenerator { .. }
            | RuntimeError::NotInGenerator => "GeneratorError",
            RuntimeError::NoActiveFrame
            | RuntimeError::InvalidSlot { .. }
            | RuntimeError::DanglingCapture { .. }
            | RuntimeError::FrameUnderflow { .. } => "InternalError",
            RuntimeError::Fatal { .. } => "FatalError",
            RuntimeError::Uncaught { .. } => "Error",
        }
    }

    /// Script-visible `Error` object describing this error
    pub fn to_value(&self) -> Value {
        error_object(&self.to_string(), self.kind_name())
    }

    /// Frame snapshot taken when the error was raised, if any
    pub fn trace(&self) -> Option<&StackTrace> {
        match self {
            RuntimeError::StackOverflow { trace, .. }
            | RuntimeError::Fatal { trace, .. }
            | RuntimeError::Uncaught { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

/// Errors loading configuration or serialized chunks
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid chunk: {0}")]
    Chunk(String),
}
