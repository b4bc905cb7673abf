#![forbid(unsafe_code)]

//! Observable handles: the tracked façade over a raw object.
//!
//! A [`Handle`] stands in for exactly one raw object under one [`Variant`].
//! All tracked access goes through it: property reads call `track`, writes
//! call `trigger`, and nested objects read through a deep handle come back
//! wrapped. Plain objects and arrays dispatch to the property handlers;
//! maps and sets are reached through
//! [`Handle::collection`].
//!
//! # Invariants
//!
//! 1. A mutable handle always wraps a raw object directly.
//! 2. A readonly handle wraps either a raw object or a mutable handle; in
//!    the latter case reads delegate to (and are tracked by) that handle.
//! 3. [`to_raw`] of any handle is the innermost raw object.

use std::fmt::Display;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::base_handlers::{ObjectHandler, handler_for};
use crate::collection_handlers::Collection;
use crate::error::{ReactiveError, Result};
use crate::object::{ObjectKind, RawObject};
use crate::runtime::RuntimeInner;
use crate::shared::ObjectId;
use crate::value::{PropKey, Value};

/// Wrapping flavor: deep or shallow, mutable or readonly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Mutable; nested objects are wrapped on read.
    Reactive,
    /// Mutable; nested objects are returned as stored.
    ShallowReactive,
    /// Readonly; nested objects are wrapped readonly on read.
    Readonly,
    /// Readonly; nested objects are returned as stored.
    ShallowReadonly,
}

impl Variant {
    #[must_use]
    pub const fn is_readonly(self) -> bool {
        matches!(self, Self::Readonly | Self::ShallowReadonly)
    }

    #[must_use]
    pub const fn is_shallow(self) -> bool {
        matches!(self, Self::ShallowReactive | Self::ShallowReadonly)
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Reactive => 0,
            Self::ShallowReactive => 1,
            Self::Readonly => 2,
            Self::ShallowReadonly => 3,
        }
    }
}

/// What a handle wraps.
#[derive(Clone)]
pub(crate) enum Target {
    Raw(RawObject),
    Observed(Handle),
}

struct HandleInner {
    id: ObjectId,
    target: Target,
    variant: Variant,
    runtime: Weak<RuntimeInner>,
}

/// An observable view of a raw object, array, map or set.
///
/// Cloning a `Handle` creates a new reference to the **same** view; handles
/// compare by identity.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<HandleInner>,
}

#[derive(Clone)]
pub(crate) struct WeakHandle {
    inner: Weak<HandleInner>,
}

impl WeakHandle {
    pub(crate) fn upgrade(&self) -> Option<Handle> {
        self.inner.upgrade().map(|inner| Handle { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner.target {
            Target::Raw(raw) => write!(f, "{:?}({} {})", self.inner.variant, raw.kind(), raw.id()),
            Target::Observed(inner) => write!(f, "{:?}({inner:?})", self.inner.variant),
        }
    }
}

impl Handle {
    pub(crate) fn new(target: Target, variant: Variant, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                id: ObjectId::next(),
                target,
                variant,
                runtime,
            }),
        }
    }

    /// Identity of this handle (distinct from the raw object's).
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    /// The innermost raw object.
    #[must_use]
    pub fn raw(&self) -> RawObject {
        match &self.inner.target {
            Target::Raw(raw) => raw.clone(),
            Target::Observed(inner) => inner.raw(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match &self.inner.target {
            Target::Raw(raw) => raw.kind(),
            Target::Observed(inner) => inner.kind(),
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind() == ObjectKind::Array
    }

    /// Whether this is a mutable view, or a readonly view over one.
    #[must_use]
    pub fn is_reactive(&self) -> bool {
        if !self.inner.variant.is_readonly() {
            return true;
        }
        match &self.inner.target {
            Target::Raw(_) => false,
            Target::Observed(inner) => inner.is_reactive(),
        }
    }

    pub(crate) fn target(&self) -> &Target {
        &self.inner.target
    }

    pub(crate) fn runtime(&self) -> Option<Rc<RuntimeInner>> {
        self.inner.runtime.upgrade()
    }

    pub(crate) fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn handler(&self) -> &'static dyn ObjectHandler {
        handler_for(self.inner.variant)
    }

    /// Report an attempted mutation of readonly data.
    pub(crate) fn warn_readonly(&self, operation: &'static str, key: &dyn Display) {
        let enabled = self
            .runtime()
            .is_none_or(|rt| rt.config().warn_on_readonly_mutation);
        if enabled {
            warn!(
                operation,
                key = %key,
                object = %self.raw().id(),
                "{operation} operation on key \"{key}\" failed: target is readonly"
            );
        }
    }

    fn require_properties(&self, operation: &'static str) -> Result<()> {
        let kind = self.kind();
        if kind.is_collection() {
            return Err(ReactiveError::kind_mismatch(operation, kind));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Property access
// ---------------------------------------------------------------------------

impl Handle {
    /// Read a property, tracking it unless this view is readonly. Object
    /// values come back wrapped unless this view is shallow.
    ///
    /// Maps and sets have no properties: use [`collection`](Self::collection).
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        if self.kind().is_collection() {
            return Value::Undefined;
        }
        self.handler().get(self, &key.into())
    }

    /// Write a property, re-running dependents if the key is new or the
    /// value changed. On a readonly view this warns and changes nothing.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        self.require_properties("property write")?;
        self.handler().set(self, key.into(), value.into())
    }

    /// Whether `key` is an own property, tracking it.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        if self.kind().is_collection() {
            return false;
        }
        self.handler().has(self, &key.into())
    }

    /// Delete a property. Returns whether the delete succeeded.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        self.require_properties("property delete")?;
        self.handler().delete_property(self, &key.into())
    }

    /// Own keys in order, tracking the target's shape.
    #[must_use]
    pub fn own_keys(&self) -> Vec<PropKey> {
        if self.kind().is_collection() {
            return Vec::new();
        }
        self.handler().own_keys(self)
    }

    /// Array length, property count, or collection size (tracked).
    #[must_use]
    pub fn len(&self) -> usize {
        match self.kind() {
            ObjectKind::Array => self
                .get(PropKey::length())
                .as_number()
                .map_or(0, |n| n as usize),
            ObjectKind::Plain => self.own_keys().len(),
            ObjectKind::Map | ObjectKind::Set => {
                self.collection().map_or(0, |collection| collection.size())
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Method-level access to a map or set.
    pub fn collection(&self) -> Result<Collection> {
        let kind = self.kind();
        if !kind.is_collection() {
            return Err(ReactiveError::kind_mismatch("collection access", kind));
        }
        Ok(Collection::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Whether `value` is a mutable handle, or a readonly handle over one.
#[doc(alias = "is_observable")]
#[must_use]
pub fn is_reactive(value: &Value) -> bool {
    value.as_handle().is_some_and(Handle::is_reactive)
}

/// Whether `value` is a readonly handle.
#[must_use]
pub fn is_readonly(value: &Value) -> bool {
    value
        .as_handle()
        .is_some_and(|handle| handle.variant().is_readonly())
}

/// Whether `value` is a shallow handle or a shallow ref.
#[must_use]
pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Observed(handle) => handle.variant().is_shallow(),
        Value::Ref(r) => r.is_shallow(),
        _ => false,
    }
}

/// Whether `value` is any handle.
#[must_use]
pub fn is_proxy(value: &Value) -> bool {
    is_reactive(value) || is_readonly(value)
}

/// The raw object behind a handle; anything else unchanged.
#[must_use]
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Observed(handle) => Value::Object(handle.raw()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[test]
    fn predicates_by_variant() {
        let rt = Runtime::new();
        let raw = RawObject::new();
        let reactive = rt.reactive(&raw);
        let readonly = rt.readonly(&raw);
        let shallow = rt.shallow_reactive(&raw);
        let view = rt.readonly(reactive.clone());

        assert!(is_reactive(&reactive) && !is_readonly(&reactive));
        assert!(!is_reactive(&readonly) && is_readonly(&readonly));
        assert!(is_reactive(&view) && is_readonly(&view));
        assert!(is_shallow(&shallow) && !is_shallow(&reactive));
        assert!(is_proxy(&reactive) && is_proxy(&readonly));
        assert!(!is_proxy(&Value::from(&raw)));
        assert!(!is_reactive(&Value::from(1)));
    }

    #[test]
    fn to_raw_unwraps_every_layer() {
        let rt = Runtime::new();
        let raw = RawObject::new();
        let view = rt.readonly(rt.reactive(&raw));
        assert_eq!(to_raw(&view), Value::from(&raw));
        assert_eq!(to_raw(&Value::from(2)), Value::from(2));
    }

    #[test]
    fn property_ops_reject_collections() {
        let rt = Runtime::new();
        let map = rt.reactive(RawObject::map([("a", 1)])).into_handle().unwrap();
        assert!(map.get("a").is_undefined());
        assert!(!map.has("a"));
        assert!(map.own_keys().is_empty());
        assert!(matches!(
            map.set("a", 2),
            Err(ReactiveError::KindMismatch { .. })
        ));
        assert_eq!(map.len(), 1);
        assert!(map.collection().is_ok());

        let obj = rt.reactive(RawObject::new()).into_handle().unwrap();
        assert!(obj.collection().is_err());
    }

    #[test]
    fn debug_names_variant_and_target() {
        let rt = Runtime::new();
        let raw = RawObject::array([1]);
        let handle = rt.readonly(&raw).into_handle().unwrap();
        let dbg = format!("{handle:?}");
        assert!(dbg.starts_with("Readonly(array #"));
    }
}
