#![forbid(unsafe_code)]

//! Raw values: the caller-owned objects, arrays, maps and sets that handles
//! wrap.
//!
//! A [`RawObject`] is a shared, identity-bearing cell. Cloning it clones the
//! reference, not the contents. Every operation here is *untracked*: raw reads
//! never subscribe anything and raw writes never re-run anything. Only
//! [`Handle`](crate::Handle) operations go through track/trigger.
//!
//! # Invariants
//!
//! 1. `id()` is stable for the object's lifetime and unique in the process.
//! 2. Plain objects, maps and sets preserve insertion order.
//! 3. Arrays are dense: holes read as `Undefined`.
//! 4. Once extensions are prevented, no new key can be added.
//!
//! # Failure Modes
//!
//! - Property operations on a map or set fail with
//!   [`ReactiveError::KindMismatch`]; reads return `Undefined`.
//! - Named keys other than `"length"` on an array fail with
//!   [`ReactiveError::InvalidArrayKey`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};

use crate::error::{ReactiveError, Result};
use crate::shared::{MAX_ARRAY_INDEX, ObjectId, as_array_length};
use crate::value::{PropKey, Value};

/// Classification of a raw object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Ordered string/symbol-keyed property bag.
    Plain,
    /// Dense, index-addressed sequence with a `"length"` property.
    Array,
    /// Keyed collection: arbitrary value keys to values.
    Map,
    /// Set-like collection of unique values.
    Set,
}

impl ObjectKind {
    /// Whether the kind is intercepted by method instrumentation rather than
    /// property access.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Map | Self::Set)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "object",
            Self::Array => "array",
            Self::Map => "map",
            Self::Set => "set",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) enum ObjectData {
    Plain(IndexMap<PropKey, Value, RandomState>),
    Array(Vec<Value>),
    Map(IndexMap<Value, Value, RandomState>),
    Set(IndexSet<Value, RandomState>),
}

impl ObjectData {
    fn kind(&self) -> ObjectKind {
        match self {
            Self::Plain(_) => ObjectKind::Plain,
            Self::Array(_) => ObjectKind::Array,
            Self::Map(_) => ObjectKind::Map,
            Self::Set(_) => ObjectKind::Set,
        }
    }
}

struct RawInner {
    id: ObjectId,
    extensible: Cell<bool>,
    data: RefCell<ObjectData>,
}

/// Shared handle to a raw object, array, map or set.
#[derive(Clone)]
pub struct RawObject {
    inner: Rc<RawInner>,
}

/// Non-owning reference to a [`RawObject`], used by identity-keyed tables.
#[derive(Clone)]
pub(crate) struct WeakObject {
    inner: Weak<RawInner>,
}

impl WeakObject {
    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl RawObject {
    fn with_data(data: ObjectData) -> Self {
        Self {
            inner: Rc::new(RawInner {
                id: ObjectId::next(),
                extensible: Cell::new(true),
                data: RefCell::new(data),
            }),
        }
    }

    /// Create an empty plain object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_data(ObjectData::Plain(IndexMap::default()))
    }

    /// Create a plain object from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropKey>,
        V: Into<Value>,
    {
        Self::with_data(ObjectData::Plain(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Create an array from its elements.
    pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::with_data(ObjectData::Array(
            items.into_iter().map(Into::into).collect(),
        ))
    }

    /// Create a keyed collection from key/value pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::with_data(ObjectData::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Create a set-like collection from its values.
    pub fn set_of<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::with_data(ObjectData::Set(
            values.into_iter().map(Into::into).collect(),
        ))
    }
}

impl Default for RawObject {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Identity & metadata
// ---------------------------------------------------------------------------

impl RawObject {
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.inner.data.borrow().kind()
    }

    /// Kind without panicking while a write holds the contents.
    pub(crate) fn try_kind(&self) -> Option<ObjectKind> {
        self.inner.data.try_borrow().ok().map(|data| data.kind())
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind() == ObjectKind::Array
    }

    /// Whether both references point to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.inner.extensible.get()
    }

    /// Forbid adding new keys. Existing keys stay writable. Objects that are
    /// not extensible are never wrapped.
    pub fn prevent_extensions(&self) {
        self.inner.extensible.set(false);
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for RawObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // try_borrow: Debug may run while a write is in flight.
        match self.inner.data.try_borrow() {
            Ok(data) => match &*data {
                ObjectData::Plain(props) => {
                    write!(f, "Object{} ", self.inner.id)?;
                    f.debug_map().entries(props.iter()).finish()
                }
                ObjectData::Array(items) => {
                    write!(f, "Array{} ", self.inner.id)?;
                    f.debug_list().entries(items.iter()).finish()
                }
                ObjectData::Map(entries) => {
                    write!(f, "Map{} ", self.inner.id)?;
                    f.debug_map().entries(entries.iter()).finish()
                }
                ObjectData::Set(values) => {
                    write!(f, "Set{} ", self.inner.id)?;
                    f.debug_set().entries(values.iter()).finish()
                }
            },
            Err(_) => write!(f, "Object{} <borrowed>", self.inner.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Property access (plain objects and arrays)
// ---------------------------------------------------------------------------

impl RawObject {
    /// Read a property. Missing keys, and any key on a collection, read as
    /// `Undefined`.
    #[must_use]
    pub fn get(&self, key: &PropKey) -> Value {
        match &*self.inner.data.borrow() {
            ObjectData::Plain(props) => props.get(key).cloned().unwrap_or_default(),
            ObjectData::Array(items) => match key {
                PropKey::Index(idx) => items.get(*idx).cloned().unwrap_or_default(),
                key if key.is_length() => Value::from(items.len()),
                _ => Value::Undefined,
            },
            ObjectData::Map(_) | ObjectData::Set(_) => Value::Undefined,
        }
    }

    /// Whether `key` is an own property. For arrays, any index below the
    /// length and `"length"` itself.
    #[must_use]
    pub fn has_own(&self, key: &PropKey) -> bool {
        match &*self.inner.data.borrow() {
            ObjectData::Plain(props) => props.contains_key(key),
            ObjectData::Array(items) => match key {
                PropKey::Index(idx) => *idx < items.len(),
                key => key.is_length(),
            },
            ObjectData::Map(_) | ObjectData::Set(_) => false,
        }
    }

    /// Write a property.
    ///
    /// Returns `Ok(false)` when the key is new and the object is not
    /// extensible; nothing is written in that case.
    pub fn set(&self, key: PropKey, value: Value) -> Result<bool> {
        let extensible = self.is_extensible();
        let mut data = self.inner.data.borrow_mut();
        match &mut *data {
            ObjectData::Plain(props) => {
                if let Some(slot) = props.get_mut(&key) {
                    *slot = value;
                } else if extensible {
                    props.insert(key, value);
                } else {
                    return Ok(false);
                }
                Ok(true)
            }
            ObjectData::Array(items) => match key {
                PropKey::Index(idx) => {
                    if idx >= items.len() {
                        if !extensible {
                            return Ok(false);
                        }
                        let len = idx
                            .checked_add(1)
                            .filter(|&len| len <= MAX_ARRAY_INDEX + 1)
                            .ok_or_else(|| ReactiveError::InvalidArrayKey {
                                key: idx.to_string(),
                            })?;
                        items.resize(len, Value::Undefined);
                    }
                    items[idx] = value;
                    Ok(true)
                }
                key if key.is_length() => {
                    let len = value
                        .as_number()
                        .and_then(as_array_length)
                        .ok_or_else(|| ReactiveError::InvalidLength {
                            value: format!("{value:?}"),
                        })?;
                    if len > items.len() && !extensible {
                        return Ok(false);
                    }
                    items.resize(len, Value::Undefined);
                    Ok(true)
                }
                key => Err(ReactiveError::InvalidArrayKey {
                    key: key.to_string(),
                }),
            },
            other => Err(ReactiveError::kind_mismatch("property write", other.kind())),
        }
    }

    /// Delete a property. Returns whether the delete succeeded.
    ///
    /// Deleting an array index leaves a hole (`Undefined`) and keeps the
    /// length; deleting `"length"` always fails.
    pub fn delete(&self, key: &PropKey) -> Result<bool> {
        let mut data = self.inner.data.borrow_mut();
        match &mut *data {
            ObjectData::Plain(props) => {
                props.shift_remove(key);
                Ok(true)
            }
            ObjectData::Array(items) => match key {
                PropKey::Index(idx) => {
                    if let Some(slot) = items.get_mut(*idx) {
                        *slot = Value::Undefined;
                    }
                    Ok(true)
                }
                key if key.is_length() => Ok(false),
                _ => Ok(true),
            },
            other => Err(ReactiveError::kind_mismatch("property delete", other.kind())),
        }
    }

    /// Own enumerable keys in order. Arrays list their indices.
    #[must_use]
    pub fn own_keys(&self) -> Vec<PropKey> {
        match &*self.inner.data.borrow() {
            ObjectData::Plain(props) => props.keys().cloned().collect(),
            ObjectData::Array(items) => (0..items.len()).map(PropKey::Index).collect(),
            ObjectData::Map(_) | ObjectData::Set(_) => Vec::new(),
        }
    }

    /// Array length, or the number of properties/entries for other kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.inner.data.borrow() {
            ObjectData::Plain(props) => props.len(),
            ObjectData::Array(items) => items.len(),
            ObjectData::Map(entries) => entries.len(),
            ObjectData::Set(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Collection access (maps and sets)
// ---------------------------------------------------------------------------

impl RawObject {
    /// Whether the collection contains `key` (a map key or a set value).
    #[must_use]
    pub fn collection_has(&self, key: &Value) -> bool {
        match &*self.inner.data.borrow() {
            ObjectData::Map(entries) => entries.contains_key(key),
            ObjectData::Set(values) => values.contains(key),
            _ => false,
        }
    }

    /// Value stored under a map key. Sets and missing keys yield `Undefined`.
    #[must_use]
    pub fn collection_get(&self, key: &Value) -> Value {
        match &*self.inner.data.borrow() {
            ObjectData::Map(entries) => entries.get(key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Insert or replace a map entry, returning the previous value.
    pub fn collection_insert(&self, key: Value, value: Value) -> Result<Option<Value>> {
        match &mut *self.inner.data.borrow_mut() {
            ObjectData::Map(entries) => Ok(entries.insert(key, value)),
            other => Err(ReactiveError::kind_mismatch("map set", other.kind())),
        }
    }

    /// Add a value to a set. Returns whether it was newly inserted.
    pub fn collection_add(&self, value: Value) -> Result<bool> {
        match &mut *self.inner.data.borrow_mut() {
            ObjectData::Set(values) => Ok(values.insert(value)),
            other => Err(ReactiveError::kind_mismatch("set add", other.kind())),
        }
    }

    /// Remove a map key or set value. Returns whether something was removed.
    pub fn collection_remove(&self, key: &Value) -> Result<bool> {
        match &mut *self.inner.data.borrow_mut() {
            ObjectData::Map(entries) => Ok(entries.shift_remove(key).is_some()),
            ObjectData::Set(values) => Ok(values.shift_remove(key)),
            other => Err(ReactiveError::kind_mismatch("collection delete", other.kind())),
        }
    }

    /// Remove every entry.
    pub fn collection_clear(&self) -> Result<()> {
        match &mut *self.inner.data.borrow_mut() {
            ObjectData::Map(entries) => entries.clear(),
            ObjectData::Set(values) => values.clear(),
            other => {
                return Err(ReactiveError::kind_mismatch("collection clear", other.kind()));
            }
        }
        Ok(())
    }

    /// Entry at insertion position `pos` as `(key, value)`. Set entries
    /// pair each value with itself.
    #[must_use]
    pub fn entry_at(&self, pos: usize) -> Option<(Value, Value)> {
        match &*self.inner.data.borrow() {
            ObjectData::Map(entries) => entries
                .get_index(pos)
                .map(|(k, v)| (k.clone(), v.clone())),
            ObjectData::Set(values) => values.get_index(pos).map(|v| (v.clone(), v.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_roundtrip() {
        let obj = RawObject::from_pairs([("a", 1), ("b", 2)]);
        assert_eq!(obj.kind(), ObjectKind::Plain);
        assert_eq!(obj.get(&"a".into()), Value::from(1));
        assert!(obj.get(&"z".into()).is_undefined());
        assert!(obj.set("c".into(), Value::from(3)).unwrap());
        assert_eq!(
            obj.own_keys(),
            vec![PropKey::from("a"), PropKey::from("b"), PropKey::from("c")]
        );
        assert!(obj.delete(&"a".into()).unwrap());
        assert!(!obj.has_own(&"a".into()));
        assert_eq!(obj.len(), 2);
    }

    #[test]
    fn array_length_truncates_and_pads() {
        let arr = RawObject::array([1, 2, 3]);
        assert_eq!(arr.get(&PropKey::length()), Value::from(3));
        arr.set(PropKey::length(), Value::from(1)).unwrap();
        assert_eq!(arr.len(), 1);
        arr.set(PropKey::length(), Value::from(3)).unwrap();
        assert_eq!(arr.len(), 3);
        assert!(arr.get(&PropKey::Index(2)).is_undefined());
    }

    #[test]
    fn array_index_write_past_end_pads() {
        let arr = RawObject::array([1]);
        arr.set(PropKey::Index(3), Value::from(9)).unwrap();
        assert_eq!(arr.len(), 4);
        assert!(arr.get(&PropKey::Index(1)).is_undefined());
        assert_eq!(arr.get(&PropKey::Index(3)), Value::from(9));
    }

    #[test]
    fn array_rejects_named_keys_and_bad_lengths() {
        let arr = RawObject::array([1]);
        assert!(matches!(
            arr.set("foo".into(), Value::from(1)),
            Err(ReactiveError::InvalidArrayKey { .. })
        ));
        assert!(matches!(
            arr.set(PropKey::length(), Value::from(1.5)),
            Err(ReactiveError::InvalidLength { .. })
        ));
        assert!(matches!(
            arr.set(PropKey::length(), Value::from("2")),
            Err(ReactiveError::InvalidLength { .. })
        ));
    }

    #[test]
    fn array_rejects_indices_past_the_limit() {
        let arr = RawObject::array([1]);
        assert!(matches!(
            arr.set(PropKey::Index(usize::MAX), Value::from(1)),
            Err(ReactiveError::InvalidArrayKey { .. })
        ));
        assert!(matches!(
            arr.set(PropKey::from(usize::MAX), Value::from(1)),
            Err(ReactiveError::InvalidArrayKey { .. })
        ));
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn array_delete_leaves_hole() {
        let arr = RawObject::array([1, 2]);
        assert!(arr.delete(&PropKey::Index(0)).unwrap());
        assert_eq!(arr.len(), 2);
        assert!(arr.get(&PropKey::Index(0)).is_undefined());
        assert!(!arr.delete(&PropKey::length()).unwrap());
    }

    #[test]
    fn non_extensible_rejects_new_keys() {
        let obj = RawObject::from_pairs([("a", 1)]);
        obj.prevent_extensions();
        assert!(!obj.is_extensible());
        assert!(obj.set("a".into(), Value::from(2)).unwrap());
        assert!(!obj.set("b".into(), Value::from(2)).unwrap());
        assert!(!obj.has_own(&"b".into()));
    }

    #[test]
    fn map_and_set_operations() {
        let map = RawObject::map([("k", 1)]);
        assert!(map.kind().is_collection());
        assert!(map.collection_has(&Value::from("k")));
        assert_eq!(
            map.collection_insert(Value::from("k"), Value::from(2)).unwrap(),
            Some(Value::from(1))
        );
        assert_eq!(map.entry_at(0), Some((Value::from("k"), Value::from(2))));
        assert!(map.collection_add(Value::from(1)).is_err());

        let set = RawObject::set_of([1, 2]);
        assert!(!set.collection_add(Value::from(1)).unwrap());
        assert!(set.collection_add(Value::from(3)).unwrap());
        assert_eq!(set.entry_at(2), Some((Value::from(3), Value::from(3))));
        assert!(set.collection_remove(&Value::from(1)).unwrap());
        assert_eq!(set.len(), 2);
        set.collection_clear().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn property_ops_on_collections_fail() {
        let map = RawObject::map::<&str, i32>([]);
        assert!(map.get(&"size".into()).is_undefined());
        assert!(matches!(
            map.set("x".into(), Value::from(1)),
            Err(ReactiveError::KindMismatch {
                kind: ObjectKind::Map,
                ..
            })
        ));
    }

    #[test]
    fn debug_shows_kind_and_contents() {
        let arr = RawObject::array([1, 2]);
        let dbg = format!("{arr:?}");
        assert!(dbg.starts_with("Array#"));
        assert!(dbg.contains("[1, 2]"));
    }

    #[test]
    fn debug_of_a_cycle_stays_shallow() {
        let obj = RawObject::new();
        obj.set("me".into(), Value::from(&obj)).unwrap();
        let dbg = format!("{obj:?}");
        assert!(dbg.starts_with("Object#"));
        assert!(dbg.contains(&format!("object{}", obj.id())));

        let arr = RawObject::array([Value::Undefined]);
        arr.set(PropKey::Index(0), Value::from(&arr)).unwrap();
        assert!(matches!(
            arr.set(PropKey::length(), Value::from(&arr)),
            Err(ReactiveError::InvalidLength { .. })
        ));
    }
}
