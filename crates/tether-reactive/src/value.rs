#![forbid(unsafe_code)]

//! Dynamic values, property keys and symbols.
//!
//! # Equality
//!
//! Three notions of equality are in play and each has one home:
//!
//! | Relation | Where | `NaN == NaN` | `+0 == -0` |
//! |----------|-------|--------------|------------|
//! | same-value ([`Value::same_value`]) | change detection | yes | no |
//! | same-value-zero (`PartialEq`/`Hash`) | collection keys, `includes` | yes | yes |
//! | strict ([`Value::strict_equals`]) | `index_of` | no | yes |
//!
//! Objects, handles, refs and symbols compare by identity under all three.

use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::handle::Handle;
use crate::object::RawObject;
use crate::refs::Ref;
use crate::shared::{MAX_ARRAY_INDEX, parse_index};

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

/// First id handed out to user symbols; lower ids are well-known symbols.
const FIRST_USER_SYMBOL: u64 = 16;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(FIRST_USER_SYMBOL);

/// A unique property key that is never confused with a string key.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Rc<str>,
}

impl Symbol {
    /// Create a fresh symbol. Two symbols with the same description are
    /// still distinct.
    #[must_use]
    pub fn new(description: impl Into<Rc<str>>) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    fn well_known(id: u64, description: &str) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }

    /// The default-iteration protocol marker.
    #[must_use]
    pub fn iterator() -> Self {
        Self::well_known(0, "Symbol.iterator")
    }

    /// The async-iteration protocol marker.
    #[must_use]
    pub fn async_iterator() -> Self {
        Self::well_known(1, "Symbol.asyncIterator")
    }

    /// The type-tag marker.
    #[must_use]
    pub fn to_string_tag() -> Self {
        Self::well_known(2, "Symbol.toStringTag")
    }

    /// Whether this is one of the built-in protocol markers. Reads of these
    /// keys are never tracked.
    #[must_use]
    pub fn is_well_known(&self) -> bool {
        self.id < FIRST_USER_SYMBOL
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

// ---------------------------------------------------------------------------
// PropKey
// ---------------------------------------------------------------------------

/// Key of a property on a plain object or an element of an array.
///
/// Strings in canonical array-index form are normalized to [`PropKey::Index`]
/// on construction, so `PropKey::from("3") == PropKey::from(3)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    Index(usize),
    Name(Rc<str>),
    Symbol(Symbol),
}

impl PropKey {
    /// The literal `"length"` key.
    #[must_use]
    pub fn length() -> Self {
        Self::Name("length".into())
    }

    #[must_use]
    pub fn is_length(&self) -> bool {
        matches!(self, Self::Name(name) if &**name == "length")
    }

    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Whether reads of this key skip tracking.
    #[must_use]
    pub fn is_builtin_symbol(&self) -> bool {
        matches!(self, Self::Symbol(sym) if sym.is_well_known())
    }

    /// Convert to the equivalent collection key (property keys become
    /// strings or numbers).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Index(idx) => Value::Number(*idx as f64),
            Self::Name(name) => Value::Str(Rc::clone(name)),
            Self::Symbol(sym) => Value::Symbol(sym.clone()),
        }
    }
}

impl From<&str> for PropKey {
    fn from(key: &str) -> Self {
        match parse_index(key) {
            Some(idx) => Self::Index(idx),
            None => Self::Name(key.into()),
        }
    }
}

impl From<String> for PropKey {
    fn from(key: String) -> Self {
        Self::from(key.as_str())
    }
}

impl From<Rc<str>> for PropKey {
    fn from(key: Rc<str>) -> Self {
        match parse_index(&key) {
            Some(idx) => Self::Index(idx),
            None => Self::Name(key),
        }
    }
}

/// Integers past the largest array index are ordinary named keys.
impl From<usize> for PropKey {
    fn from(idx: usize) -> Self {
        if idx <= MAX_ARRAY_INDEX {
            Self::Index(idx)
        } else {
            Self::Name(idx.to_string().into())
        }
    }
}

/// Negative integers are ordinary named keys (`"-1"`).
impl From<i32> for PropKey {
    fn from(n: i32) -> Self {
        match usize::try_from(n) {
            Ok(idx) => Self::Index(idx),
            Err(_) => Self::Name(n.to_string().into()),
        }
    }
}

impl From<Symbol> for PropKey {
    fn from(sym: Symbol) -> Self {
        Self::Symbol(sym)
    }
}

impl From<&PropKey> for PropKey {
    fn from(key: &PropKey) -> Self {
        key.clone()
    }
}

impl std::fmt::Display for PropKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Name(name) => f.write_str(name),
            Self::Symbol(sym) => write!(f, "{sym:?}"),
        }
    }
}

impl std::fmt::Debug for PropKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Name(name) => write!(f, "{name:?}"),
            Self::Symbol(sym) => write!(f, "{sym:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed value: a primitive, a raw object, an observable
/// handle over a raw object, or a ref.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Symbol(Symbol),
    /// A raw object, array, map or set.
    Object(RawObject),
    /// An observable handle standing in for a raw object.
    Observed(Handle),
    /// A single-slot value box.
    Ref(Ref),
}

impl Value {
    /// Whether this value can be wrapped (a raw object or a handle).
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Observed(_))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&RawObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Self::Observed(handle) => Some(handle),
            _ => None,
        }
    }

    /// Consume the value, returning the handle it holds.
    #[must_use]
    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Self::Observed(handle) => Some(handle),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_ref(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Identity/value equality used for change detection.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                (a.is_nan() && b.is_nan())
                    || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            _ => self.same_non_number(other),
        }
    }

    /// Strict equality: like same-value-zero, but `NaN` equals nothing.
    #[must_use]
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            _ => self.same_non_number(other),
        }
    }

    fn same_non_number(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Observed(a), Self::Observed(b)) => a.ptr_eq(b),
            (Self::Ref(a), Self::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Short name of the value's type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
            Self::Observed(_) => "observed",
            Self::Ref(_) => "ref",
        }
    }

    /// Read the value through a ref if it is one.
    #[must_use]
    pub fn unref(&self) -> Value {
        match self {
            Self::Ref(r) => r.get(),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.same_non_number(other),
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => {
                // +0 and -0 hash alike; every NaN hashes alike.
                let bits = if *n == 0.0 {
                    0u64
                } else if n.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    n.to_bits()
                };
                bits.hash(state);
            }
            Self::Str(s) => s.hash(state),
            Self::Symbol(sym) => sym.hash(state),
            Self::Object(obj) => obj.id().hash(state),
            Self::Observed(handle) => handle.id().hash(state),
            Self::Ref(r) => r.addr().hash(state),
        }
    }
}

/// Objects and refs print as a kind and identity only, so cyclic data
/// formats without recursing.
impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Symbol(sym) => write!(f, "{sym:?}"),
            Self::Object(obj) => match obj.try_kind() {
                Some(kind) => write!(f, "{kind}{}", obj.id()),
                None => write!(f, "object{}", obj.id()),
            },
            Self::Observed(handle) => write!(f, "{handle:?}"),
            Self::Ref(_) => f.write_str("Ref(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<Symbol> for Value {
    fn from(sym: Symbol) -> Self {
        Self::Symbol(sym)
    }
}

impl From<RawObject> for Value {
    fn from(obj: RawObject) -> Self {
        Self::Object(obj)
    }
}

impl From<&RawObject> for Value {
    fn from(obj: &RawObject) -> Self {
        Self::Object(obj.clone())
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Self::Observed(handle)
    }
}

impl From<&Handle> for Value {
    fn from(handle: &Handle) -> Self {
        Self::Observed(handle.clone())
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Self::Ref(r)
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
