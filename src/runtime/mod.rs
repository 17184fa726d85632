// src/runtime/mod.rs
//! Runtime components: values, frames, closures and the execution context

pub mod closure;
pub mod frame;
pub mod function;
pub mod generator;
pub mod object;
pub mod stringify;
pub mod value;
pub mod vm;

pub use closure::{CellState, ClosureCell};
pub use frame::{CallFrame, FrameId, StackTrace, TraceFrame, TryHandler};
pub use function::{Capture, Chunk, Constant, FunctionObj};
pub use generator::{GeneratorRegistry, GeneratorState};
pub use object::{FieldDef, ForeignHandle, ListRef, ObjectData, TypeDef};
pub use stringify::{format_number, stringify};
pub use value::{assign, Assignment, FunctionRef, ObjectRef, Payload, Tag, Value, ValueFlags};
pub use vm::{spread_arguments, Vm};
