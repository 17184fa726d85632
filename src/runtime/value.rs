// src/runtime/value.rs
//! Dynamic value type shared by the interpreter and native extensions
//!
//! Scalars (numbers, strings, booleans, `None`) are stored by value. Compound
//! kinds are reference-counted handles, so cloning a `Value` of compound kind
//! aliases the same heap object and mutation through one alias is visible
//! through every other alias.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::native::{FailureMode, NativeFunction};
use crate::runtime::function::{Chunk, FunctionObj};
use crate::runtime::object::{ForeignHandle, ListRef, ObjectData, TypeDef};
use crate::runtime::stringify::stringify;
use crate::RuntimeError;

/// Shared handle to a compiled function
pub type FunctionRef = Rc<RefCell<FunctionObj>>;

/// Shared handle to an object instance
pub type ObjectRef = Rc<RefCell<ObjectData>>;

static NEXT_VALUE_ID: AtomicU64 = AtomicU64::new(1);

#[inline]
fn next_id() -> u64 {
    NEXT_VALUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runtime type tag of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Number,
    String,
    Boolean,
    List,
    Type,
    Object,
    Function,
    Native,
    Pointer,
    None,
}

impl Tag {
    /// User-visible name of the tag
    pub fn name(self) -> &'static str {
        match self {
            Tag::Number => "Number",
            Tag::String => "String",
            Tag::Boolean => "Boolean",
            Tag::List => "List",
            Tag::Type => "Type",
            Tag::Object => "Object",
            Tag::Function => "Function",
            Tag::Native => "Native",
            Tag::Pointer => "Pointer",
            Tag::None => "None",
        }
    }

    /// Whether values of this tag are shared heap handles
    pub fn is_compound(self) -> bool {
        !matches!(self, Tag::Number | Tag::String | Tag::Boolean | Tag::None)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Metadata carried alongside every value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ValueFlags: u8 {
        /// Spread this list into separate arguments at a call site
        const UNPACK = 1;
        /// Collect surplus call arguments into this parameter
        const PACKER = 1 << 1;
        /// Binding rejects reassignment
        const IS_CONST = 1 << 2;
        /// Const binding still being initialised; accepts one store
        const TEMP_NON_CONST = 1 << 3;
    }
}

/// Payload of a value, one variant per tag
#[derive(Clone)]
pub enum Payload {
    Number(f64),
    String(String),
    Boolean(bool),
    List(ListRef),
    Type(Rc<TypeDef>),
    Object(ObjectRef),
    Function(FunctionRef),
    Native(Rc<NativeFunction>),
    Pointer(Rc<ForeignHandle>),
    None,
}

/// A runtime datum
#[derive(Clone)]
pub struct Value {
    payload: Payload,
    id: u64,
    flags: ValueFlags,
    on_change: Option<Rc<Value>>,
}

impl Value {
    fn from_payload(payload: Payload) -> Self {
        Self {
            payload,
            id: next_id(),
            flags: ValueFlags::empty(),
            on_change: None,
        }
    }

    /// Construct the zero value of a tag
    pub fn new(tag: Tag) -> Self {
        match tag {
            Tag::Number => Self::number(0.0),
            Tag::String => Self::string(""),
            Tag::Boolean => Self::boolean(false),
            Tag::List => Self::list(Vec::new()),
            Tag::Type => Self::type_value(TypeDef::default()),
            Tag::Object => Self::object(ObjectData::new()),
            Tag::Function => Self::function(FunctionObj::new("", Chunk::default())),
            Tag::Native => Self::native(NativeFunction::new(
                "none",
                FailureMode::Catchable,
                |_| Ok(Value::none()),
            )),
            Tag::Pointer => Self::pointer(ForeignHandle::null()),
            Tag::None => Self::none(),
        }
    }

    pub fn number(n: f64) -> Self {
        Self::from_payload(Payload::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::from_payload(Payload::String(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::from_payload(Payload::Boolean(b))
    }

    pub fn none() -> Self {
        Self::from_payload(Payload::None)
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::from_payload(Payload::List(Rc::new(RefCell::new(items))))
    }

    pub fn object(object: ObjectData) -> Self {
        Self::from_payload(Payload::Object(Rc::new(RefCell::new(object))))
    }

    pub fn type_value(ty: TypeDef) -> Self {
        Self::type_ref(Rc::new(ty))
    }

    /// Wrap an existing shared type definition
    pub fn type_ref(ty: Rc<TypeDef>) -> Self {
        Self::from_payload(Payload::Type(ty))
    }

    pub fn function(function: FunctionObj) -> Self {
        Self::function_ref(Rc::new(RefCell::new(function)))
    }

    /// Wrap an existing shared function
    pub fn function_ref(function: FunctionRef) -> Self {
        Self::from_payload(Payload::Function(function))
    }

    pub fn native(native: NativeFunction) -> Self {
        Self::from_payload(Payload::Native(Rc::new(native)))
    }

    pub fn pointer(handle: ForeignHandle) -> Self {
        Self::from_payload(Payload::Pointer(Rc::new(handle)))
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn tag(&self) -> Tag {
        match &self.payload {
            Payload::Number(_) => Tag::Number,
            Payload::String(_) => Tag::String,
            Payload::Boolean(_) => Tag::Boolean,
            Payload::List(_) => Tag::List,
            Payload::Type(_) => Tag::Type,
            Payload::Object(_) => Tag::Object,
            Payload::Function(_) => Tag::Function,
            Payload::Native(_) => Tag::Native,
            Payload::Pointer(_) => Tag::Pointer,
            Payload::None => Tag::None,
        }
    }

    /// Identity assigned at construction; shared by clones
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> ValueFlags {
        self.flags
    }

    pub fn with_flags(mut self, flags: ValueFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn set_flags(&mut self, flags: ValueFlags, enabled: bool) {
        self.flags.set(flags, enabled);
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(ValueFlags::IS_CONST)
    }

    /// Hook invoked when the binding holding this value is reassigned
    pub fn on_change(&self) -> Option<&Value> {
        self.on_change.as_deref()
    }

    pub fn set_on_change(&mut self, hook: Option<Value>) {
        self.on_change = hook.map(Rc::new);
    }

    // Fail-fast accessors. A mismatched tag is a programming error.

    pub fn as_number(&self) -> f64 {
        match &self.payload {
            Payload::Number(n) => *n,
            _ => self.tag_mismatch(Tag::Number),
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.payload {
            Payload::String(s) => s,
            _ => self.tag_mismatch(Tag::String),
        }
    }

    pub fn as_bool(&self) -> bool {
        match &self.payload {
            Payload::Boolean(b) => *b,
            _ => self.tag_mismatch(Tag::Boolean),
        }
    }

    pub fn as_list(&self) -> &ListRef {
        match &self.payload {
            Payload::List(list) => list,
            _ => self.tag_mismatch(Tag::List),
        }
    }

    pub fn as_type(&self) -> &Rc<TypeDef> {
        match &self.payload {
            Payload::Type(ty) => ty,
            _ => self.tag_mismatch(Tag::Type),
        }
    }

    pub fn as_object(&self) -> &ObjectRef {
        match &self.payload {
            Payload::Object(object) => object,
            _ => self.tag_mismatch(Tag::Object),
        }
    }

    pub fn as_function(&self) -> &FunctionRef {
        match &self.payload {
            Payload::Function(function) => function,
            _ => self.tag_mismatch(Tag::Function),
        }
    }

    pub fn as_native(&self) -> &Rc<NativeFunction> {
        match &self.payload {
            Payload::Native(native) => native,
            _ => self.tag_mismatch(Tag::Native),
        }
    }

    pub fn as_pointer(&self) -> &Rc<ForeignHandle> {
        match &self.payload {
            Payload::Pointer(handle) => handle,
            _ => self.tag_mismatch(Tag::Pointer),
        }
    }

    #[cold]
    #[track_caller]
    fn tag_mismatch(&self, expected: Tag) -> ! {
        panic!(
            "value accessor mismatch: expected {}, found {}",
            expected,
            self.tag()
        )
    }

    // Checked accessors

    pub fn try_number(&self) -> Result<f64, RuntimeError> {
        match &self.payload {
            Payload::Number(n) => Ok(*n),
            _ => Err(self.mismatch(Tag::Number)),
        }
    }

    pub fn try_str(&self) -> Result<&str, RuntimeError> {
        match &self.payload {
            Payload::String(s) => Ok(s),
            _ => Err(self.mismatch(Tag::String)),
        }
    }

    pub fn try_bool(&self) -> Result<bool, RuntimeError> {
        match &self.payload {
            Payload::Boolean(b) => Ok(*b),
            _ => Err(self.mismatch(Tag::Boolean)),
        }
    }

    pub fn try_list(&self) -> Result<&ListRef, RuntimeError> {
        match &self.payload {
            Payload::List(list) => Ok(list),
            _ => Err(self.mismatch(Tag::List)),
        }
    }

    pub fn try_type(&self) -> Result<&Rc<TypeDef>, RuntimeError> {
        match &self.payload {
            Payload::Type(ty) => Ok(ty),
            _ => Err(self.mismatch(Tag::Type)),
        }
    }

    pub fn try_object(&self) -> Result<&ObjectRef, RuntimeError> {
        match &self.payload {
            Payload::Object(object) => Ok(object),
            _ => Err(self.mismatch(Tag::Object)),
        }
    }

    pub fn try_function(&self) -> Result<&FunctionRef, RuntimeError> {
        match &self.payload {
            Payload::Function(function) => Ok(function),
            _ => Err(self.mismatch(Tag::Function)),
        }
    }

    pub fn try_native(&self) -> Result<&Rc<NativeFunction>, RuntimeError> {
        match &self.payload {
            Payload::Native(native) => Ok(native),
            _ => Err(self.mismatch(Tag::Native)),
        }
    }

    pub fn try_pointer(&self) -> Result<&Rc<ForeignHandle>, RuntimeError> {
        match &self.payload {
            Payload::Pointer(handle) => Ok(handle),
            _ => Err(self.mismatch(Tag::Pointer)),
        }
    }

    fn mismatch(&self, expected: Tag) -> RuntimeError {
        RuntimeError::TagMismatch {
            expected,
            found: self.tag(),
        }
    }

    /// Reference identity for compound kinds, construction identity otherwise
    pub fn same_identity(&self, other: &Value) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::List(a), Payload::List(b)) => Rc::ptr_eq(a, b),
            (Payload::Type(a), Payload::Type(b)) => Rc::ptr_eq(a, b),
            (Payload::Object(a), Payload::Object(b)) => Rc::ptr_eq(a, b),
            (Payload::Function(a), Payload::Function(b)) => Rc::ptr_eq(a, b),
            (Payload::Native(a), Payload::Native(b)) => Rc::ptr_eq(a, b),
            (Payload::Pointer(a), Payload::Pointer(b)) => Rc::ptr_eq(a, b),
            _ => self.id == other.id,
        }
    }

    /// Only `false`, `None`, zero and the empty string are falsy
    pub fn is_truthy(&self) -> bool {
        match &self.payload {
            Payload::Boolean(b) => *b,
            Payload::None => false,
            Payload::Number(n) => *n != 0.0,
            Payload::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.payload, Payload::None)
    }

    /// Whether this is an error object produced by a catchable failure
    pub fn is_error(&self) -> bool {
        match &self.payload {
            Payload::Object(object) => object.borrow().type_name() == Some(TypeDef::ERROR),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::none()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Number(a), Payload::Number(b)) => a == b,
            (Payload::String(a), Payload::String(b)) => a == b,
            (Payload::Boolean(a), Payload::Boolean(b)) => a == b,
            (Payload::None, Payload::None) => true,
            _ if self.tag() == other.tag() && self.tag().is_compound() => {
                self.same_identity(other)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify(self, false))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.tag(), self.id, stringify(self, true))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::list(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::none(),
        }
    }
}

/// Result of storing into a binding
#[derive(Debug)]
pub struct Assignment {
    /// Value to place in the binding
    pub value: Value,
    /// Hook the caller must invoke with the new value
    pub hook: Option<Value>,
}

/// Apply const and on-change semantics to a store into binding `name`
///
/// Flags describe bindings, not data: the stored value keeps none of the
/// incoming value's flags, and is const only when it seals a const under
/// initialisation.
pub fn assign(
    name: &str,
    current: Option<&Value>,
    mut incoming: Value,
) -> Result<Assignment, RuntimeError> {
    incoming.set_flags(ValueFlags::all(), false);
    let Some(current) = current else {
        return Ok(Assignment {
            value: incoming,
            hook: None,
        });
    };

    let flags = current.flags();
    if flags.contains(ValueFlags::IS_CONST) {
        if !flags.contains(ValueFlags::TEMP_NON_CONST) {
            return Err(RuntimeError::ConstReassignment {
                name: name.to_string(),
            });
        }
        // First store into a const under initialisation seals it.
        incoming.set_flags(ValueFlags::IS_CONST, true);
    }

    let hook = current.on_change.clone();
    if incoming.on_change.is_none() {
        incoming.on_change = hook.clone();
    }

    Ok(Assignment {
        value: incoming,
        hook: hook.map(|h| (*h).clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::new(Tag::Number).as_number(), 0.0);
        assert_eq!(Value::new(Tag::String).as_str(), "");
        assert!(!Value::new(Tag::Boolean).as_bool());
        assert!(Value::new(Tag::List).as_list().borrow().is_empty());
        assert!(Value::new(Tag::Object).as_object().borrow().is_empty());
        assert!(Value::new(Tag::Pointer).as_pointer().is_null());
        assert!(Value::new(Tag::None).is_none());

        for tag in [
            Tag::Number,
            Tag::String,
            Tag::Boolean,
            Tag::List,
            Tag::Type,
            Tag::Object,
            Tag::Function,
            Tag::Native,
            Tag::Pointer,
            Tag::None,
        ] {
            assert_eq!(Value::new(tag).tag(), tag);
        }
    }

    #[test]
    fn test_list_aliasing() {
        let original = Value::list(vec![Value::number(1.0)]);
        let alias = original.clone();

        alias.as_list().borrow_mut().push(Value::number(2.0));

        assert_eq!(original.as_list().borrow().len(), 2);
        assert!(original.same_identity(&alias));
        assert_eq!(original, alias);
    }

    #[test]
    fn test_distinct_lists_are_not_equal() {
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Value::number(1.5), Value::number(1.5));
        assert_eq!(Value::string("a"), Value::from("a"));
        assert_ne!(Value::number(1.0), Value::boolean(true));
        assert_eq!(Value::none(), Value::none());
    }

    #[test]
    fn test_identity_survives_clone() {
        let value = Value::number(3.0);
        let copy = value.clone();
        assert_eq!(value.id(), copy.id());
        assert!(value.same_identity(&copy));
        assert!(!value.same_identity(&Value::number(3.0)));
    }

    #[test]
    fn test_checked_accessor_mismatch() {
        let err = Value::string("x").try_number().unwrap_err();
        match err {
            RuntimeError::TagMismatch { expected, found } => {
                assert_eq!(expected, Tag::Number);
                assert_eq!(found, Tag::String);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "expected Number, found String")]
    fn test_fail_fast_accessor() {
        Value::string("x").as_number();
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::none().is_truthy());
        assert!(!Value::boolean(false).is_truthy());
        assert!(!Value::number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("a").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_assign_rejects_const() {
        let current = Value::number(1.0).with_flags(ValueFlags::IS_CONST);
        let err = assign("limit", Some(&current), Value::number(2.0)).unwrap_err();
        assert!(matches!(err, RuntimeError::ConstReassignment { ref name } if name == "limit"));
    }

    #[test]
    fn test_assign_seals_const_under_initialisation() {
        let current = Value::none().with_flags(ValueFlags::IS_CONST | ValueFlags::TEMP_NON_CONST);
        let stored = assign("limit", Some(&current), Value::number(2.0)).unwrap().value;
        assert!(stored.is_const());
        assert!(!stored.flags().contains(ValueFlags::TEMP_NON_CONST));
        assert!(assign("limit", Some(&stored), Value::number(3.0)).is_err());
    }

    #[test]
    fn test_assign_drops_incoming_binding_flags() {
        let source = Value::number(5.0).with_flags(ValueFlags::IS_CONST | ValueFlags::UNPACK);
        let current = Value::number(1.0);

        let stored = assign("b", Some(&current), source.clone()).unwrap().value;
        assert_eq!(stored.flags(), ValueFlags::empty());
        assert!(assign("b", Some(&stored), Value::number(3.0)).is_ok());

        let fresh = assign("c", None, source).unwrap().value;
        assert!(!fresh.is_const());
    }

    #[test]
    fn test_assign_returns_hook_and_keeps_it() {
        let mut current = Value::number(1.0);
        current.set_on_change(Some(Value::string("watcher")));

        let assignment = assign("x", Some(&current), Value::number(2.0)).unwrap();
        let hook = assignment.hook.expect("hook returned");
        assert_eq!(hook.as_str(), "watcher");
        assert!(hook.same_identity(current.on_change().unwrap()));
        assert!(assignment.value.on_change().is_some());
    }
}
