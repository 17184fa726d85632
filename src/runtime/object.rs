// src/runtime/object.rs
//! Heap payloads behind compound values: lists, types, objects and foreign handles

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::HashMap;

use crate::runtime::value::Value;
use crate::RuntimeError;

/// Shared, resizable sequence of values
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// One declared field of a type
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Declared field type, itself a value (usually a `Type`)
    pub field_type: Value,
    pub default: Option<Value>,
}

/// A named set of fields
#[derive(Debug, Clone, Default)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    /// Type name of error objects produced by catchable failures
    pub const ERROR: &'static str = "Error";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field declaration
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: Value,
        default: Option<Value>,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            default,
        });
        self
    }

    /// The built-in `Error` type with `message` and `type` fields
    pub fn error() -> Self {
        Self::new(Self::ERROR)
            .field("message", Value::none(), Some(Value::string("")))
            .field("type", Value::none(), Some(Value::string("")))
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Field storage of an object instance
///
/// The map is unordered; `keys` is the authoritative display and iteration
/// order. Every name in `keys` has an entry in `fields` and vice versa.
#[derive(Debug, Clone, Default)]
pub struct ObjectData {
    type_ref: Option<Rc<TypeDef>>,
    fields: HashMap<String, Value>,
    keys: Vec<String>,
}

impl ObjectData {
    /// Anonymous, structurally-typed object
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance of `ty` with fields set to their declared defaults
    pub fn instantiate(ty: &Rc<TypeDef>) -> Self {
        let mut object = Self {
            type_ref: Some(Rc::clone(ty)),
            ..Self::default()
        };
        for field in &ty.fields {
            let value = field.default.clone().unwrap_or_default();
            object.set(field.name.clone(), value);
        }
        object
    }

    pub fn type_ref(&self) -> Option<&Rc<TypeDef>> {
        self.type_ref.as_ref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_ref.as_deref().map(|t| t.name.as_str())
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Set a field, appending new names to the key order. Returns the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(slot) = self.fields.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.keys.push(key.clone());
        self.fields.insert(key, value);
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.fields.remove(key)?;
        self.keys.retain(|k| k != key);
        Some(removed)
    }

    /// Field names in authoritative order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys
            .iter()
            .filter_map(|k| self.fields.get(k).map(|v| (k.as_str(), v)))
    }
}

/// Opaque external handle wrapped by a `Pointer` value
///
/// Every handle is tagged with the kind of library that owns it, and consumers
/// must name that owner to reach the handle.
pub struct ForeignHandle {
    owner: &'static str,
    handle: RefCell<Option<Box<dyn Any>>>,
}

impl ForeignHandle {
    /// Owner kind of the null handle
    pub const NULL_OWNER: &'static str = "null";

    pub fn new<T: Any>(owner: &'static str, handle: T) -> Self {
        Self {
            owner,
            handle: RefCell::new(Some(Box::new(handle))),
        }
    }

    pub fn null() -> Self {
        Self {
            owner: Self::NULL_OWNER,
            handle: RefCell::new(None),
        }
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// True for the null handle and for handles that have been released
    pub fn is_null(&self) -> bool {
        self.handle.borrow().is_none()
    }

    /// Run `f` against the handle, provided `owner` and `T` both match
    pub fn with<T: Any, R>(&self, owner: &str, f: impl FnOnce(&T) -> R) -> Result<R, RuntimeError> {
        self.check_owner(owner)?;
        let guard = self.handle.borrow();
        let handle = guard
            .as_ref()
            .and_then(|h| h.downcast_ref::<T>())
            .ok_or_else(|| self.mismatch(owner))?;
        Ok(f(handle))
    }

    /// Mutable variant of [`ForeignHandle::with`]
    pub fn with_mut<T: Any, R>(
        &self,
        owner: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RuntimeError> {
        self.check_owner(owner)?;
        let mut guard = self.handle.borrow_mut();
        let handle = guard
            .as_mut()
            .and_then(|h| h.downcast_mut::<T>())
            .ok_or_else(|| self.mismatch(owner))?;
        Ok(f(handle))
    }

    /// Take the handle out, leaving the pointer null
    pub fn release<T: Any>(&self, owner: &str) -> Result<T, RuntimeError> {
        self.check_owner(owner)?;
        let mut guard = self.handle.borrow_mut();
        match guard.take().map(|h| h.downcast::<T>()) {
            Some(Ok(handle)) => Ok(*handle),
            Some(Err(original)) => {
                *guard = Some(original);
                Err(self.mismatch(owner))
            }
            None => Err(self.mismatch(owner)),
        }
    }

    fn check_owner(&self, owner: &str) -> Result<(), RuntimeError> {
        if self.owner == owner {
            Ok(())
        } else {
            Err(self.mismatch(owner))
        }
    }

    fn mismatch(&self, expected: &str) -> RuntimeError {
        RuntimeError::PointerOwnerMismatch {
            expected: expected.to_string(),
            found: self.owner.to_string(),
        }
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignHandle({})", self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_order() {
        let mut object = ObjectData::new();
        object.set("b", Value::number(1.0));
        object.set("a", Value::number(2.0));
        object.set("b", Value::number(3.0));

        assert_eq!(object.keys(), ["b", "a"]);
        assert_eq!(object.get("b"), Some(&Value::number(3.0)));

        let order: Vec<&str> = object.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_object_remove_keeps_invariant() {
        let mut object = ObjectData::new();
        object.set("x", Value::number(1.0));
        object.set("y", Value::number(2.0));

        assert_eq!(object.remove("x"), Some(Value::number(1.0)));
        assert_eq!(object.remove("x"), None);
        assert_eq!(object.keys(), ["y"]);
        assert!(!object.contains_key("x"));
        assert_eq!(object.len(), 1);
    }

    #[test]
    fn test_instantiate_uses_defaults() {
        let ty = Rc::new(
            TypeDef::new("Point")
                .field("x", Value::none(), Some(Value::number(0.0)))
                .field("y", Value::none(), None),
        );
        let object = ObjectData::instantiate(&ty);

        assert_eq!(object.type_name(), Some("Point"));
        assert_eq!(object.keys(), ["x", "y"]);
        assert_eq!(object.get("x"), Some(&Value::number(0.0)));
        assert!(object.get("y").unwrap().is_none());
    }

    #[test]
    fn test_foreign_handle_owner_check() {
        let handle = ForeignHandle::new("sqlite", 42_u32);

        assert_eq!(handle.with("sqlite", |n: &u32| *n).unwrap(), 42);
        assert!(matches!(
            handle.with("window", |n: &u32| *n),
            Err(RuntimeError::PointerOwnerMismatch { .. })
        ));
        // right owner, wrong concrete type
        assert!(handle.with("sqlite", |s: &String| s.len()).is_err());
    }

    #[test]
    fn test_foreign_handle_release() {
        let handle = ForeignHandle::new("file", String::from("log.txt"));
        handle.with_mut("file", |s: &mut String| s.push('!')).unwrap();

        assert!(handle.release::<u8>("file").is_err());
        assert_eq!(handle.release::<String>("file").unwrap(), "log.txt!");
        assert!(handle.is_null());
    }
}
