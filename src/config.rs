// src/config.rs
//! VM configuration

use serde::{Deserialize, Serialize};

use crate::LoadError;

/// Default bound on nested calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 3000;

/// Default pre-sized capacity of the shared value stack
pub const DEFAULT_STACK_CAPACITY: usize = 1 << 16;

/// Default initial capacity of a generator's private stack
pub const DEFAULT_GEN_STACK_CAPACITY: usize = 64;

/// Tunables for a [`crate::Vm`]
///
/// Missing fields take their defaults, so a partial JSON document is valid:
///
/// ```rust
/// use dyn_runtime::VmConfig;
///
/// let config = VmConfig::from_json(r#"{ "max_call_depth": 500 }"#).unwrap();
/// assert_eq!(config.max_call_depth, 500);
/// assert_eq!(config.stack_capacity, 65536);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Frames allowed on the call stack at once
    pub max_call_depth: usize,
    /// Initial capacity of the shared value stack
    pub stack_capacity: usize,
    /// Initial capacity of each generator's private stack
    pub gen_stack_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_capacity: DEFAULT_STACK_CAPACITY,
            gen_stack_capacity: DEFAULT_GEN_STACK_CAPACITY,
        }
    }
}

impl VmConfig {
    pub fn from_json(source: &str) -> Result<Self, LoadError> {
        serde_json::from_str(source).map_err(|e| LoadError::Config(e.to_string()))
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_call_depth, 3000);
        assert_eq!(config.gen_stack_capacity, 64);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"max_call_depth": 10, "gen_stack_capacity": 4}"#;
        let config = VmConfig::from_json(json).unwrap();
        assert_eq!(config.max_call_depth, 10);
        assert_eq!(config.gen_stack_capacity, 4);
        assert_eq!(config.stack_capacity, DEFAULT_STACK_CAPACITY);
    }

    #[test]
    fn test_invalid_json() {
        let err = VmConfig::from_json("{ max_call_depth: }").unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }
}
