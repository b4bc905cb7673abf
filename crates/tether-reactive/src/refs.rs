#![forbid(unsafe_code)]

//! Refs: single-slot observable values.
//!
//! # Design
//!
//! A [`Ref`] is a shared cell with one trackable slot. Three kinds exist:
//!
//! - **Cell** refs (`make_ref`, `shallow_ref`) own their value and a private
//!   dep. Deep cells keep the raw form for change detection and present
//!   object values wrapped.
//! - **Property** refs (`to_ref`, `to_refs`) forward to one key of an
//!   object and have no dep of their own; tracking comes from the object.
//! - **Custom** refs (`custom_ref`) delegate to caller-supplied closures
//!   that decide when to call [`RefHooks::track`] and [`RefHooks::trigger`].
//!
//! # Invariants
//!
//! 1. A cell ref triggers only when the raw form of its value changes.
//! 2. A cell ref read tracks only when tracking is enabled and an effect is
//!    active.
//! 3. `make_ref(r)` for an existing ref `r` returns `r`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::dep::{Dep, DepCell};
use crate::error::{ReactiveError, Result};
use crate::handle::{Variant, is_reactive, to_raw};
use crate::object::{ObjectKind, RawObject};
use crate::runtime::{Runtime, RuntimeInner};
use crate::shared::has_changed;
use crate::value::{PropKey, Value};

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Manual track/trigger callbacks handed to a [`custom_ref`](Runtime::custom_ref)
/// factory.
#[derive(Clone)]
pub struct RefHooks {
    dep: Dep,
    runtime: Weak<RuntimeInner>,
}

impl RefHooks {
    fn new(runtime: Weak<RuntimeInner>) -> Self {
        Self {
            dep: DepCell::new_dep(),
            runtime,
        }
    }

    /// Subscribe the active effect, if tracking.
    pub fn track(&self) {
        if let Some(rt) = self.runtime.upgrade()
            && rt.is_tracking()
        {
            rt.track_dep(&self.dep);
        }
    }

    /// Re-run every subscribed effect.
    pub fn trigger(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.trigger_dep(&self.dep);
        }
    }
}

impl std::fmt::Debug for RefHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefHooks")
            .field("subscribers", &self.dep.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ref
// ---------------------------------------------------------------------------

struct CellRef {
    raw: RefCell<Value>,
    value: RefCell<Value>,
    shallow: bool,
    hooks: RefHooks,
}

struct PropertyRef {
    object: Value,
    key: PropKey,
    default: Option<Value>,
}

struct CustomRef {
    get: Box<dyn Fn() -> Value>,
    set: Box<dyn Fn(Value)>,
}

enum RefInner {
    Cell(CellRef),
    Property(PropertyRef),
    Custom(CustomRef),
}

/// A single-slot observable value.
///
/// Cloning a `Ref` creates a new handle to the **same** slot; refs compare
/// by identity.
#[derive(Clone)]
pub struct Ref {
    inner: Rc<RefInner>,
}

impl std::fmt::Debug for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner {
            RefInner::Cell(cell) => match cell.value.try_borrow() {
                Ok(value) => write!(f, "Ref({value:?})"),
                Err(_) => f.write_str("Ref(<borrowed>)"),
            },
            RefInner::Property(prop) => write!(f, "PropertyRef({:?})", prop.key),
            RefInner::Custom(_) => f.write_str("CustomRef"),
        }
    }
}

impl Ref {
    fn from_inner(inner: RefInner) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared slot, for identity hashing.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// Whether this is a shallow cell ref.
    #[must_use]
    pub fn is_shallow(&self) -> bool {
        matches!(&*self.inner, RefInner::Cell(cell) if cell.shallow)
    }

    /// Read the value, tracking the read.
    #[must_use]
    pub fn get(&self) -> Value {
        match &*self.inner {
            RefInner::Cell(cell) => {
                cell.hooks.track();
                cell.value.borrow().clone()
            }
            RefInner::Property(prop) => {
                let value = read_property(&prop.object, &prop.key);
                match (&prop.default, value.is_undefined()) {
                    (Some(default), true) => default.clone(),
                    _ => value,
                }
            }
            RefInner::Custom(custom) => (custom.get)(),
        }
    }

    /// Write the value, reporting failures on the warning channel.
    pub fn set(&self, value: impl Into<Value>) {
        if let Err(err) = self.try_set(value) {
            warn!(error = %err, "ref write failed");
        }
    }

    /// Write the value. Only property refs can fail, when the underlying
    /// write does.
    pub fn try_set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match &*self.inner {
            RefInner::Cell(cell) => {
                let new_raw = if cell.shallow { value } else { to_raw(&value) };
                if !has_changed(&new_raw, &cell.raw.borrow()) {
                    return Ok(());
                }
                let presented = if cell.shallow {
                    new_raw.clone()
                } else {
                    wrap_deep(&cell.hooks.runtime, new_raw.clone())
                };
                cell.raw.replace(new_raw);
                cell.value.replace(presented);
                cell.hooks.trigger();
                Ok(())
            }
            RefInner::Property(prop) => write_property(&prop.object, prop.key.clone(), value),
            RefInner::Custom(custom) => {
                (custom.set)(value);
                Ok(())
            }
        }
    }

    /// Number of effects subscribed to a cell or custom ref.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        match &*self.inner {
            RefInner::Cell(cell) => cell.hooks.dep.len(),
            RefInner::Property(_) | RefInner::Custom(_) => 0,
        }
    }
}

fn wrap_deep(runtime: &Weak<RuntimeInner>, value: Value) -> Value {
    if !value.is_object() {
        return value;
    }
    match runtime.upgrade() {
        Some(rt) => rt.observe(value, Variant::Reactive),
        None => value,
    }
}

/// Read `object[key]` through whatever `object` is.
fn read_property(object: &Value, key: &PropKey) -> Value {
    match object {
        Value::Observed(handle) => handle.get(key),
        Value::Object(raw) => raw.get(key),
        _ => Value::Undefined,
    }
}

fn write_property(object: &Value, key: PropKey, value: Value) -> Result<()> {
    match object {
        Value::Observed(handle) => handle.set(key, value),
        Value::Object(raw) => {
            if raw.set(key.clone(), value)? {
                Ok(())
            } else {
                Err(ReactiveError::NotExtensible {
                    key: key.to_string(),
                })
            }
        }
        _ => Ok(()),
    }
}

/// Whether `value` is a ref.
#[must_use]
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The ref's current value if `value` is a ref, else `value` unchanged.
#[must_use]
pub fn unref(value: &Value) -> Value {
    value.unref()
}

// ---------------------------------------------------------------------------
// Auto-unwrapping view
// ---------------------------------------------------------------------------

/// A property view that reads through refs and writes into them.
///
/// Produced by [`Runtime::proxy_refs`]. Over a reactive handle the view is a
/// plain passthrough, since such handles already manage their own values.
#[derive(Clone, Debug)]
pub struct RefsProxy {
    target: Value,
    passthrough: bool,
}

impl RefsProxy {
    /// The wrapped object.
    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// Whether reads and writes go straight to a reactive handle.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Read a property, unwrapping it if it holds a ref.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let value = read_property(&self.target, &key.into());
        if self.passthrough { value } else { value.unref() }
    }

    /// Write a property. If the slot holds a ref and `value` is not one, the
    /// ref is written instead of the slot.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if !self.passthrough
            && let Value::Ref(slot) = read_property(&self.target, &key)
            && !is_ref(&value)
        {
            return slot.try_set(value);
        }
        write_property(&self.target, key, value)
    }

    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        match &self.target {
            Value::Observed(handle) => handle.has(key),
            Value::Object(raw) => raw.has_own(&key),
            _ => false,
        }
    }

    #[must_use]
    pub fn own_keys(&self) -> Vec<PropKey> {
        match &self.target {
            Value::Observed(handle) => handle.own_keys(),
            Value::Object(raw) => raw.own_keys(),
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl Runtime {
    fn cell_ref(&self, value: Value, shallow: bool) -> Ref {
        let hooks = RefHooks::new(Rc::downgrade(&self.inner));
        let (raw, presented) = if shallow {
            (value.clone(), value)
        } else {
            let raw = to_raw(&value);
            let presented = wrap_deep(&hooks.runtime, raw.clone());
            (raw, presented)
        };
        Ref::from_inner(RefInner::Cell(CellRef {
            raw: RefCell::new(raw),
            value: RefCell::new(presented),
            shallow,
            hooks,
        }))
    }

    /// A ref whose object values are presented deep-wrapped. An existing
    /// ref is returned unchanged.
    pub fn make_ref(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(existing) => existing,
            value => self.cell_ref(value, false),
        }
    }

    /// A ref that stores and returns its value as given. An existing ref is
    /// returned unchanged.
    pub fn shallow_ref(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(existing) => existing,
            value => self.cell_ref(value, true),
        }
    }

    /// A ref bound to `object[key]`. If that slot already holds a ref, it is
    /// returned. `default` is substituted when the slot reads `Undefined`.
    pub fn to_ref(
        &self,
        object: impl Into<Value>,
        key: impl Into<PropKey>,
        default: Option<Value>,
    ) -> Ref {
        let object = object.into();
        let key = key.into();
        if let Value::Ref(existing) = read_property(&object, &key) {
            return existing;
        }
        Ref::from_inner(RefInner::Property(PropertyRef {
            object,
            key,
            default,
        }))
    }

    /// A raw object (or array) of property refs, one per own key of
    /// `object`. Maps and sets have no properties and are rejected.
    pub fn to_refs(&self, object: impl Into<Value>) -> Result<RawObject> {
        let object = object.into();
        let kind = match &object {
            Value::Observed(handle) => handle.kind(),
            Value::Object(raw) => raw.kind(),
            other => {
                warn!(value = other.type_name(), "to_refs expects an object");
                return Ok(RawObject::new());
            }
        };
        if kind.is_collection() {
            return Err(ReactiveError::kind_mismatch("to_refs", kind));
        }
        if !is_reactive(&object) {
            warn!("to_refs called on a non-reactive object; the refs will not be tracked");
        }
        let keys = match &object {
            Value::Observed(handle) => handle.own_keys(),
            Value::Object(raw) => raw.own_keys(),
            _ => Vec::new(),
        };
        if kind == ObjectKind::Array {
            return Ok(RawObject::array(
                keys.into_iter()
                    .map(|key| self.to_ref(object.clone(), key, None)),
            ));
        }
        Ok(RawObject::from_pairs(keys.into_iter().map(|key| {
            let r = self.to_ref(object.clone(), key.clone(), None);
            (key, r)
        })))
    }

    /// A ref whose reads and writes are the closures returned by `factory`.
    ///
    /// `factory` receives the hooks the closures call to track a read and
    /// to re-run dependents after a write.
    pub fn custom_ref<G, S>(&self, factory: impl FnOnce(RefHooks) -> (G, S)) -> Ref
    where
        G: Fn() -> Value + 'static,
        S: Fn(Value) + 'static,
    {
        let hooks = RefHooks::new(Rc::downgrade(&self.inner));
        let (get, set) = factory(hooks);
        Ref::from_inner(RefInner::Custom(CustomRef {
            get: Box::new(get),
            set: Box::new(set),
        }))
    }

    /// A view of `object` that unwraps refs on read and writes through them.
    /// A reactive handle is returned as a passthrough.
    pub fn proxy_refs(&self, object: impl Into<Value>) -> RefsProxy {
        let target = object.into();
        let passthrough = is_reactive(&target);
        RefsProxy {
            target,
            passthrough,
        }
    }
}
