// src/runtime/function.rs
//! Compiled functions and their code chunks

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::runtime::closure::ClosureCell;
use crate::runtime::value::Value;
use crate::LoadError;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Serializable constant pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    String(String),
    Boolean(bool),
    None,
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Number(n) => Value::number(*n),
            Constant::String(s) => Value::string(s.clone()),
            Constant::Boolean(b) => Value::boolean(*b),
            Constant::None => Value::none(),
        }
    }
}

/// Opaque bytecode with its line table, constant pool and variable names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub code: Vec<u8>,
    /// Source line per code byte
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
    /// Local variable names, indexed by slot
    pub variables: Vec<String>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte of code emitted for `line`
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn add_constant(&mut self, constant: Constant) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    pub fn add_variable(&mut self, name: impl Into<String>) -> usize {
        self.variables.push(name.into());
        self.variables.len() - 1
    }

    pub fn constant(&self, index: usize) -> Option<Value> {
        self.constants.get(index).map(Constant::to_value)
    }

    /// Source line for an instruction offset; offsets past the table clamp to its end
    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines
            .get(offset)
            .or_else(|| self.lines.last())
            .copied()
            .unwrap_or(0)
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, LoadError> {
        bincode::serialize(self).map_err(|e| LoadError::Chunk(e.to_string()))
    }

    /// Load a chunk produced by [`Chunk::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        bincode::deserialize(data).map_err(|e| LoadError::Chunk(e.to_string()))
    }
}

/// A free variable captured from an enclosing frame
#[derive(Debug, Clone)]
pub struct Capture {
    pub name: String,
    /// Slot in the enclosing frame
    pub slot: usize,
    pub cell: ClosureCell,
}

impl Capture {
    /// Promoted to its own storage because the enclosing frame exited
    pub fn is_closed(&self) -> bool {
        self.cell.is_closed()
    }
}

/// A compiled function
#[derive(Debug, Clone)]
pub struct FunctionObj {
    pub name: String,
    /// Number of required parameters
    pub arity: usize,
    /// Number of trailing parameters with defaults
    pub defaults_count: usize,
    pub chunk: Chunk,
    pub params: Vec<String>,
    pub defaults: Vec<Value>,
    /// Receiver for bound methods
    pub bound_object: Option<Value>,
    /// Module the function was defined in
    pub import_path: String,
    pub captures: Vec<Capture>,
    pub is_generator: bool,
    pub generator_init: bool,
    pub generator_done: bool,
    instance: u64,
}

impl FunctionObj {
    pub fn new(name: impl Into<String>, chunk: Chunk) -> Self {
        Self {
            name: name.into(),
            arity: 0,
            defaults_count: 0,
            chunk,
            params: Vec::new(),
            defaults: Vec::new(),
            bound_object: None,
            import_path: String::new(),
            captures: Vec::new(),
            is_generator: false,
            generator_init: false,
            generator_done: false,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Set parameter names; `defaults` apply to the trailing parameters
    pub fn with_signature(mut self, params: Vec<String>, defaults: Vec<Value>) -> Self {
        self.arity = params.len().saturating_sub(defaults.len());
        self.defaults_count = defaults.len().min(params.len());
        self.params = params;
        self.defaults = defaults;
        self
    }

    pub fn as_generator(mut self) -> Self {
        self.is_generator = true;
        self
    }

    pub fn bind_to(mut self, object: Value) -> Self {
        self.bound_object = Some(object);
        self
    }

    pub fn from_module(mut self, import_path: impl Into<String>) -> Self {
        self.import_path = import_path.into();
        self
    }

    /// Identity of this function object, stable across generator suspensions
    #[inline]
    pub fn instance(&self) -> u64 {
        self.instance
    }

    #[inline]
    pub fn min_args(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn max_args(&self) -> usize {
        self.params.len()
    }

    /// Locals a frame of this function needs
    pub fn local_count(&self) -> usize {
        self.params.len().max(self.chunk.variables.len())
    }

    /// Module-qualified name
    pub fn qualified_name(&self) -> String {
        if self.import_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.import_path, self.name)
        }
    }

    pub fn capture(&self, name: &str) -> Option<&Capture> {
        self.captures.iter().find(|c| c.name == name)
    }

    /// Record a capture, replacing any previous one with the same name
    pub fn add_capture(&mut self, capture: Capture) {
        match self.captures.iter_mut().find(|c| c.name == capture.name) {
            Some(existing) => *existing = capture,
            None => self.captures.push(capture),
        }
    }

    /// Independent copy with reset generator state and a new identity
    ///
    /// Captured cells stay shared with the original.
    pub fn fresh_instance(&self) -> Self {
        Self {
            generator_init: false,
            generator_done: false,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_with_defaults() {
        let f = FunctionObj::new("greet", Chunk::new()).with_signature(
            vec!["name".into(), "greeting".into()],
            vec![Value::string("hello")],
        );
        assert_eq!(f.min_args(), 1);
        assert_eq!(f.max_args(), 2);
        assert_eq!(f.defaults_count, 1);
    }

    #[test]
    fn test_line_lookup_clamps() {
        let mut chunk = Chunk::new();
        chunk.write(0x01, 3);
        chunk.write(0x02, 4);
        assert_eq!(chunk.line_at(0), 3);
        assert_eq!(chunk.line_at(1), 4);
        assert_eq!(chunk.line_at(99), 4);
        assert_eq!(Chunk::new().line_at(0), 0);
    }

    #[test]
    fn test_chunk_serialization() {
        let mut chunk = Chunk::new();
        chunk.write(0x10, 1);
        chunk.add_constant(Constant::Number(2.5));
        chunk.add_constant(Constant::String("hi".into()));
        chunk.add_variable("x");

        let bytes = chunk.to_bytes().unwrap();
        let decoded = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, chunk);
        assert_eq!(decoded.constant(1), Some(Value::string("hi")));
    }

    #[test]
    fn test_chunk_decode_error() {
        assert!(matches!(Chunk::from_bytes(&[0xff]), Err(LoadError::Chunk(_))));
    }

    #[test]
    fn test_fresh_instance_resets_generator() {
        let mut f = FunctionObj::new("count", Chunk::new()).as_generator();
        f.generator_init = true;
        f.generator_done = true;

        let fresh = f.fresh_instance();
        assert!(fresh.is_generator);
        assert!(!fresh.generator_init);
        assert!(!fresh.generator_done);
        assert_ne!(fresh.instance(), f.instance());
    }

    #[test]
    fn test_qualified_name() {
        let f = FunctionObj::new("open", Chunk::new()).from_module("std/io");
        assert_eq!(f.qualified_name(), "std/io::open");
    }
}
