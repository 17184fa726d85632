// src/native/args.rs
//! Argument validation for native functions

use std::rc::Rc;

use crate::native::NativeFailure;
use crate::runtime::object::{ForeignHandle, ListRef};
use crate::runtime::value::{ObjectRef, Value};
use crate::RuntimeError;

/// Arguments of one native call, with the callee's name for error messages
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    name: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(name: &'a str, values: &'a [Value]) -> Self {
        Self { name, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn expect_count(&self, count: usize) -> Result<(), NativeFailure> {
        if self.values.len() == count {
            Ok(())
        } else {
            Err(NativeFailure::arity(self.name, &count.to_string(), self.values.len()))
        }
    }

    pub fn expect_range(&self, min: usize, max: usize) -> Result<(), NativeFailure> {
        if (min..=max).contains(&self.values.len()) {
            Ok(())
        } else {
            Err(NativeFailure::arity(
                self.name,
                &format!("{min} to {max}"),
                self.values.len(),
            ))
        }
    }

    pub fn get(&self, index: usize) -> Result<&'a Value, NativeFailure> {
        self.values.get(index).ok_or_else(|| {
            NativeFailure::arity(self.name, &format!("at least {}", index + 1), self.values.len())
        })
    }

    /// Argument at `index`, or `None` when absent
    pub fn optional(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    pub fn number(&self, index: usize) -> Result<f64, NativeFailure> {
        let value = self.get(index)?;
        value.try_number().map_err(|e| self.type_error(index, e))
    }

    pub fn string(&self, index: usize) -> Result<&'a str, NativeFailure> {
        let value = self.get(index)?;
        value.try_str().map_err(|e| self.type_error(index, e))
    }

    pub fn boolean(&self, index: usize) -> Result<bool, NativeFailure> {
        let value = self.get(index)?;
        value.try_bool().map_err(|e| self.type_error(index, e))
    }

    pub fn list(&self, index: usize) -> Result<&'a ListRef, NativeFailure> {
        let value = self.get(index)?;
        value.try_list().map_err(|e| self.type_error(index, e))
    }

    pub fn object(&self, index: usize) -> Result<&'a ObjectRef, NativeFailure> {
        let value = self.get(index)?;
        value.try_object().map_err(|e| self.type_error(index, e))
    }

    /// Pointer argument that must belong to `owner`
    pub fn pointer(
        &self,
        index: usize,
        owner: &str,
    ) -> Result<&'a Rc<ForeignHandle>, NativeFailure> {
        let value = self.get(index)?;
        let handle = value.try_pointer().map_err(|e| self.type_error(index, e))?;
        if handle.owner() != owner {
            return Err(NativeFailure::new(
                "TypeError",
                format!(
                    "{} argument {} must be a {} pointer, got a {} pointer",
                    self.name,
                    index,
                    owner,
                    handle.owner()
                ),
            ));
        }
        Ok(handle)
    }

    fn type_error(&self, index: usize, err: RuntimeError) -> NativeFailure {
        match err {
            RuntimeError::TagMismatch { expected, found } => {
                NativeFailure::type_error(self.name, index, expected, found)
            }
            other => other.into(),
        }
    }
}
