#![forbid(unsafe_code)]

//! Method instrumentation for maps and sets.
//!
//! Collections expose their contents through methods rather than
//! properties, so they get their own surface, [`Collection`], obtained from
//! [`Handle::collection`]. Its methods mirror the property handlers:
//!
//! | Method | Tracks | Triggers |
//! |--------|--------|----------|
//! | `get`, `has` | the key and its raw form | |
//! | `size`, `values`, `entries`, `iter`, `for_each` | `Iterate` | |
//! | `keys` on a map | `MapKeyIterate` | |
//! | `add`, `set` (new key) | | `Add` |
//! | `set` (changed value) | | `Set` |
//! | `delete` (present key) | | `Delete` |
//! | `clear` (non-empty) | | `Clear` |
//!
//! Readonly views track nothing themselves and reject every mutation with a
//! warning. Lookup keys and stored values are normalized to their raw form;
//! a lookup that misses with the key as given retries with its raw form.

use std::iter::FusedIterator;
use std::rc::{Rc, Weak};

use crate::dep::{TrackKey, TriggerOp};
use crate::error::{ReactiveError, Result};
use crate::handle::{Handle, Target, Variant, to_raw};
use crate::object::{ObjectKind, RawObject};
use crate::runtime::RuntimeInner;
use crate::shared::has_changed;
use crate::value::Value;

/// How yielded elements are presented.
#[derive(Clone)]
struct Wrapper {
    runtime: Weak<RuntimeInner>,
    /// `None` for shallow views: elements pass through as stored.
    variant: Option<Variant>,
}

impl Wrapper {
    fn for_handle(handle: &Handle) -> Self {
        let variant = handle.variant();
        let wrap_as = if variant.is_shallow() {
            None
        } else if variant.is_readonly() {
            Some(Variant::Readonly)
        } else {
            Some(Variant::Reactive)
        };
        Self {
            runtime: handle
                .runtime()
                .as_ref()
                .map_or_else(Weak::new, Rc::downgrade),
            variant: wrap_as,
        }
    }

    fn wrap(&self, value: Value) -> Value {
        match (self.variant, value.is_object()) {
            (Some(variant), true) => match self.runtime.upgrade() {
                Some(rt) => rt.observe(value, variant),
                None => value,
            },
            _ => value,
        }
    }
}

/// Method-level access to an observed map or set.
#[derive(Clone)]
pub struct Collection {
    handle: Handle,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Collection").field(&self.handle).finish()
    }
}

impl Collection {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The collection this readonly view delegates to, if any.
    fn inner(&self) -> Option<Self> {
        match self.handle.target() {
            Target::Observed(inner) => Some(Self::new(inner.clone())),
            Target::Raw(_) => None,
        }
    }

    fn is_readonly(&self) -> bool {
        self.handle.variant().is_readonly()
    }

    fn wrapper(&self) -> Wrapper {
        Wrapper::for_handle(&self.handle)
    }

    fn track(&self, raw: &RawObject, key: TrackKey) {
        if self.is_readonly() {
            return;
        }
        if let Some(rt) = self.handle.runtime() {
            rt.track(raw, key);
        }
    }

    fn trigger(&self, raw: &RawObject, key: Option<TrackKey>, op: TriggerOp, value: Option<&Value>) {
        if let Some(rt) = self.handle.runtime() {
            rt.trigger(raw, key.as_ref(), op, value);
        }
    }

    /// Track a lookup of `key` and return whichever of `key` or its raw
    /// form is present.
    fn lookup(&self, raw: &RawObject, key: Value) -> Option<Value> {
        let raw_key = to_raw(&key);
        if key != raw_key {
            self.track(raw, TrackKey::Entry(key.clone()));
        }
        self.track(raw, TrackKey::Entry(raw_key.clone()));
        if raw.collection_has(&key) {
            Some(key)
        } else if raw.collection_has(&raw_key) {
            Some(raw_key)
        } else {
            None
        }
    }

    /// Resolve the stored form of `key` for a mutation.
    fn present_key(raw: &RawObject, key: Value) -> (Value, bool) {
        if raw.collection_has(&key) {
            return (key, true);
        }
        let raw_key = to_raw(&key);
        let had = raw.collection_has(&raw_key);
        (raw_key, had)
    }

    fn reject(&self, operation: &'static str, key: &Value) -> bool {
        if self.is_readonly() {
            self.handle.warn_readonly(operation, &format_args!("{key:?}"));
            return true;
        }
        false
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Value stored under `key` in a map. Sets have no `get` and yield
    /// `Undefined`.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = key.into();
        if let Some(inner) = self.inner() {
            return self.wrapper().wrap(inner.get(key));
        }
        let raw = self.handle.raw();
        if raw.kind() != ObjectKind::Map {
            return Value::Undefined;
        }
        match self.lookup(&raw, key) {
            Some(found) => self.wrapper().wrap(raw.collection_get(&found)),
            None => Value::Undefined,
        }
    }

    /// Whether the map key or set value is present.
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        if let Some(inner) = self.inner() {
            return inner.has(key);
        }
        let raw = self.handle.raw();
        self.lookup(&raw, key).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> usize {
        if let Some(inner) = self.inner() {
            return inner.size();
        }
        let raw = self.handle.raw();
        self.track(&raw, TrackKey::Iterate);
        raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    /// Add a value to a set.
    pub fn add(&self, value: impl Into<Value>) -> Result<()> {
        let value = to_raw(&value.into());
        let raw = self.handle.raw();
        if raw.kind() != ObjectKind::Set {
            return Err(ReactiveError::kind_mismatch("add", raw.kind()));
        }
        if self.reject("add", &value) {
            return Ok(());
        }
        if raw.collection_add(value.clone())? {
            self.trigger(&raw, Some(TrackKey::Entry(value.clone())), TriggerOp::Add, Some(&value));
        }
        Ok(())
    }

    /// Insert or replace a map entry.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = to_raw(&value.into());
        let raw = self.handle.raw();
        if raw.kind() != ObjectKind::Map {
            return Err(ReactiveError::kind_mismatch("set", raw.kind()));
        }
        if self.reject("set", &key) {
            return Ok(());
        }
        let (key, had_key) = Self::present_key(&raw, key);
        let old = raw.collection_insert(key.clone(), value.clone())?;
        if !had_key {
            self.trigger(&raw, Some(TrackKey::Entry(key)), TriggerOp::Add, Some(&value));
        } else if old.is_some_and(|old| has_changed(&value, &old)) {
            self.trigger(&raw, Some(TrackKey::Entry(key)), TriggerOp::Set, Some(&value));
        }
        Ok(())
    }

    /// Remove a map key or set value. Returns whether anything was removed.
    pub fn delete(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        if self.reject("delete", &key) {
            return Ok(false);
        }
        let raw = self.handle.raw();
        let (key, had_key) = Self::present_key(&raw, key);
        let removed = raw.collection_remove(&key)?;
        if had_key {
            self.trigger(&raw, Some(TrackKey::Entry(key)), TriggerOp::Delete, None);
        }
        Ok(removed)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        if self.reject("clear", &Value::Undefined) {
            return Ok(());
        }
        let raw = self.handle.raw();
        let had_items = !raw.is_empty();
        raw.collection_clear()?;
        if had_items {
            self.trigger(&raw, None, TriggerOp::Clear, None);
        }
        Ok(())
    }

    // ─── Iteration ───────────────────────────────────────────────────────

    /// Call `f(value, key)` for every entry in insertion order. Set entries
    /// pass each value as its own key.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        self.for_each_dyn(&mut f);
    }

    fn for_each_dyn(&self, f: &mut dyn FnMut(Value, Value)) {
        let wrapper = self.wrapper();
        if let Some(inner) = self.inner() {
            inner.for_each_dyn(&mut |value, key| f(wrapper.wrap(value), wrapper.wrap(key)));
            return;
        }
        let raw = self.handle.raw();
        self.track(&raw, TrackKey::Iterate);
        let mut pos = 0;
        while let Some((key, value)) = raw.entry_at(pos) {
            f(wrapper.wrap(value), wrapper.wrap(key));
            pos += 1;
        }
    }

    fn cursor(&self, key_only: bool) -> Cursor {
        if let Some(inner) = self.inner() {
            return Cursor::Nested(Box::new(inner.entries_with(key_only)));
        }
        let raw = self.handle.raw();
        let key = if key_only && raw.kind() == ObjectKind::Map {
            TrackKey::MapKeyIterate
        } else {
            TrackKey::Iterate
        };
        self.track(&raw, key);
        Cursor::Raw { raw, pos: 0 }
    }

    fn entries_with(&self, key_only: bool) -> Entries {
        Entries {
            cursor: self.cursor(key_only),
            wrapper: self.wrapper(),
        }
    }

    /// Map keys, or set values. On a map this depends only on the key set:
    /// replacing a value does not re-run the reader.
    #[must_use]
    pub fn keys(&self) -> Iter {
        Iter {
            entries: self.entries_with(true),
            part: Part::Key,
        }
    }

    /// Map values, or set values.
    #[must_use]
    pub fn values(&self) -> Iter {
        Iter {
            entries: self.entries_with(false),
            part: Part::Value,
        }
    }

    /// `(key, value)` pairs; set entries pair each value with itself.
    #[must_use]
    pub fn entries(&self) -> Entries {
        self.entries_with(false)
    }

    /// Default iteration: same as [`entries`](Self::entries).
    #[must_use]
    pub fn iter(&self) -> Entries {
        self.entries()
    }
}

impl IntoIterator for &Collection {
    type Item = (Value, Value);
    type IntoIter = Entries;

    fn into_iter(self) -> Entries {
        self.entries()
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

enum Cursor {
    Raw { raw: RawObject, pos: usize },
    Nested(Box<Entries>),
    Done,
}

impl Cursor {
    fn advance(&mut self) -> Option<(Value, Value)> {
        let next = match self {
            Self::Raw { raw, pos } => {
                let entry = raw.entry_at(*pos);
                *pos += 1;
                entry
            }
            Self::Nested(inner) => inner.next(),
            Self::Done => None,
        };
        if next.is_none() {
            *self = Self::Done;
        }
        next
    }
}

/// One-shot iterator over `(key, value)` pairs of a live collection,
/// wrapping each element as it is yielded.
pub struct Entries {
    cursor: Cursor,
    wrapper: Wrapper,
}

impl Iterator for Entries {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.cursor.advance()?;
        Some((self.wrapper.wrap(key), self.wrapper.wrap(value)))
    }
}

impl FusedIterator for Entries {}

impl std::fmt::Debug for Entries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entries")
            .field("done", &matches!(self.cursor, Cursor::Done))
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Part {
    Key,
    Value,
}

/// One-shot iterator over the keys or the values of a live collection.
pub struct Iter {
    entries: Entries,
    part: Part,
}

impl Iterator for Iter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let (key, value) = self.entries.cursor.advance()?;
        let item = match self.part {
            Part::Key => key,
            Part::Value => value,
        };
        Some(self.entries.wrapper.wrap(item))
    }
}

impl FusedIterator for Iter {}

impl std::fmt::Debug for Iter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("done", &matches!(self.entries.cursor, Cursor::Done))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::Runtime;

    fn map(rt: &Runtime, raw: &RawObject) -> Collection {
        rt.reactive(raw).into_handle().unwrap().collection().unwrap()
    }

    #[test]
    fn get_wraps_nested_objects() {
        let rt = Runtime::new();
        let child = RawObject::new();
        let raw = RawObject::map([("c", Value::from(&child))]);
        let m = map(&rt, &raw);
        let got = m.get("c");
        assert!(got.as_handle().is_some());
        assert!(m.get("missing").is_undefined());

        let shallow = rt
            .shallow_reactive(&raw)
            .into_handle()
            .unwrap()
            .collection()
            .unwrap();
        assert_eq!(shallow.get("c"), Value::from(&child));
    }

    #[test]
    fn observed_keys_fall_back_to_raw() {
        let rt = Runtime::new();
        let key = RawObject::new();
        let raw = RawObject::map::<Value, i32>([(Value::from(&key), 1)]);
        let m = map(&rt, &raw);
        let observed_key = rt.reactive(&key);
        assert_eq!(m.get(observed_key.clone()), Value::from(1));
        assert!(m.has(observed_key.clone()));
        m.set(observed_key.clone(), 2).unwrap();
        assert_eq!(raw.len(), 1);
        assert!(m.delete(observed_key).unwrap());
        assert!(raw.is_empty());
    }

    #[test]
    fn set_only_triggers_on_change() {
        let rt = Runtime::new();
        let raw = RawObject::map([("a", 1)]);
        let m = map(&rt, &raw);
        let runs = Rc::new(Cell::new(0));
        let (mm, r) = (m.clone(), Rc::clone(&runs));
        let effect = rt.effect(move || {
            let _ = mm.get("a");
            r.set(r.get() + 1);
        });
        m.set("a", 1).unwrap();
        assert_eq!(runs.get(), 1);
        m.set("a", 2).unwrap();
        assert_eq!(runs.get(), 2);
        effect.stop();
    }

    #[test]
    fn size_follows_adds_and_clear() {
        let rt = Runtime::new();
        let raw = RawObject::set_of([1]);
        let s = map(&rt, &raw);
        let size = Rc::new(Cell::new(0));
        let (ss, out) = (s.clone(), Rc::clone(&size));
        let effect = rt.effect(move || out.set(ss.size()));
        s.add(2).unwrap();
        assert_eq!(size.get(), 2);
        s.add(2).unwrap();
        assert_eq!(size.get(), 2);
        s.clear().unwrap();
        assert_eq!(size.get(), 0);
        assert_eq!(effect.run_count(), 3);
        s.clear().unwrap();
        assert_eq!(effect.run_count(), 3);
        effect.stop();
    }

    #[test]
    fn wrong_family_mutations_fail() {
        let rt = Runtime::new();
        let s = map(&rt, &RawObject::set_of([1]));
        assert!(matches!(s.set(1, 2), Err(ReactiveError::KindMismatch { .. })));
        assert!(s.get(1).is_undefined());
        let m = map(&rt, &RawObject::map([("a", 1)]));
        assert!(m.add(1).is_err());
    }

    #[test]
    fn iterators_are_fused_and_wrap_lazily() {
        let rt = Runtime::new();
        let child = RawObject::new();
        let raw = RawObject::map([("a", Value::from(&child)), ("b", Value::from(2))]);
        let m = map(&rt, &raw);
        let mut values = m.values();
        assert!(values.next().is_some_and(|v| v.as_handle().is_some()));
        assert_eq!(values.next(), Some(Value::from(2)));
        assert_eq!(values.next(), None);
        assert_eq!(values.next(), None);

        let keys: Vec<Value> = m.keys().collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(m.entries().count(), 2);
        assert_eq!((&m).into_iter().count(), 2);
    }

    #[test]
    fn for_each_passes_value_then_key() {
        let rt = Runtime::new();
        let m = map(&rt, &RawObject::map([("k", 7)]));
        let mut seen = Vec::new();
        m.for_each(|value, key| seen.push((value, key)));
        assert_eq!(seen, vec![(Value::from(7), Value::from("k"))]);
    }

    #[test]
    fn for_each_through_nested_readonly_views() {
        let rt = Runtime::new();
        let child = RawObject::new();
        let raw = RawObject::map([("c", Value::from(&child))]);
        let reactive = rt.reactive(&raw);
        let view = rt.readonly(reactive.clone()).into_handle().unwrap().collection().unwrap();
        let m = reactive.into_handle().unwrap().collection().unwrap();

        let runs = Rc::new(Cell::new(0));
        let (v, r) = (view.clone(), Rc::clone(&runs));
        let effect = rt.effect(move || {
            v.for_each(|value, key| {
                if key == Value::from("c") {
                    assert!(crate::is_readonly(&value));
                }
            });
            r.set(r.get() + 1);
        });
        m.set("d", 1).unwrap();
        assert_eq!(runs.get(), 2);
        effect.stop();
    }

    #[test]
    fn readonly_collection_rejects_mutation() {
        let rt = Runtime::new();
        let raw = RawObject::map([("a", 1)]);
        let ro = rt.readonly(&raw).into_handle().unwrap().collection().unwrap();
        ro.set("a", 2).unwrap();
        assert!(!ro.delete("a").unwrap());
        ro.clear().unwrap();
        assert_eq!(raw.collection_get(&Value::from("a")), Value::from(1));
        assert_eq!(ro.get("a"), Value::from(1));
    }

    #[test]
    fn readonly_view_over_reactive_collection_is_tracked() {
        let rt = Runtime::new();
        let raw = RawObject::map([("a", 1)]);
        let reactive = rt.reactive(&raw);
        let view = rt
            .readonly(reactive.clone())
            .into_handle()
            .unwrap()
            .collection()
            .unwrap();
        let m = reactive.into_handle().unwrap().collection().unwrap();
        let runs = Rc::new(Cell::new(0));
        let (v, r) = (view.clone(), Rc::clone(&runs));
        let effect = rt.effect(move || {
            let _: Vec<Value> = v.keys().collect();
            r.set(r.get() + 1);
        });
        m.set("a", 5).unwrap();
        assert_eq!(runs.get(), 1);
        m.set("b", 1).unwrap();
        assert_eq!(runs.get(), 2);
        effect.stop();
    }
}
