#![forbid(unsafe_code)]

//! Property interception for plain objects and arrays.
//!
//! [`ObjectHandler`] is the interception contract: one method per property
//! operation. It is implemented once for mutable and once for readonly
//! views, each with a `shallow` flag, giving the four variants.
//!
//! # Invariants
//!
//! 1. Mutable reads track `(raw, key)`; reads of built-in symbols never do.
//! 2. Readonly views never track directly and never write; a readonly view
//!    over a mutable handle delegates reads to it.
//! 3. A write triggers `Add` iff the key was absent, else `Set` iff the raw
//!    forms of the old and new values differ.
//! 4. A delete triggers iff the key existed and the raw delete succeeded.

use crate::dep::{TrackKey, TriggerOp};
use crate::error::{ReactiveError, Result};
use crate::handle::{Handle, Target, Variant, to_raw};
use crate::shared::has_changed;
use crate::value::{PropKey, Value};

/// Per-operation interception over a plain object or array.
pub(crate) trait ObjectHandler {
    fn get(&self, handle: &Handle, key: &PropKey) -> Value;
    fn set(&self, handle: &Handle, key: PropKey, value: Value) -> Result<()>;
    fn delete_property(&self, handle: &Handle, key: &PropKey) -> Result<bool>;
    fn has(&self, handle: &Handle, key: &PropKey) -> bool;
    fn own_keys(&self, handle: &Handle) -> Vec<PropKey>;
}

pub(crate) struct MutableHandler {
    shallow: bool,
}

pub(crate) struct ReadonlyHandler {
    shallow: bool,
}

static MUTABLE: MutableHandler = MutableHandler { shallow: false };
static SHALLOW_MUTABLE: MutableHandler = MutableHandler { shallow: true };
static READONLY: ReadonlyHandler = ReadonlyHandler { shallow: false };
static SHALLOW_READONLY: ReadonlyHandler = ReadonlyHandler { shallow: true };

pub(crate) fn handler_for(variant: Variant) -> &'static dyn ObjectHandler {
    match variant {
        Variant::Reactive => &MUTABLE,
        Variant::ShallowReactive => &SHALLOW_MUTABLE,
        Variant::Readonly => &READONLY,
        Variant::ShallowReadonly => &SHALLOW_READONLY,
    }
}

/// Track `key` on the handle's raw object, unless it is a built-in symbol.
fn track_key(handle: &Handle, key: &PropKey) {
    if key.is_builtin_symbol() {
        return;
    }
    if let Some(rt) = handle.runtime() {
        rt.track(&handle.raw(), TrackKey::Prop(key.clone()));
    }
}

/// Wrap an object value read through a deep view.
fn wrap_nested(handle: &Handle, value: Value, variant: Variant) -> Value {
    if !value.is_object() {
        return value;
    }
    match handle.runtime() {
        Some(rt) => rt.observe(value, variant),
        None => value,
    }
}

// ─── Mutable ─────────────────────────────────────────────────────────────────

impl ObjectHandler for MutableHandler {
    fn get(&self, handle: &Handle, key: &PropKey) -> Value {
        let value = handle.raw().get(key);
        if key.is_builtin_symbol() {
            return value;
        }
        track_key(handle, key);
        if self.shallow {
            return value;
        }
        wrap_nested(handle, value, Variant::Reactive)
    }

    fn set(&self, handle: &Handle, key: PropKey, value: Value) -> Result<()> {
        let raw = handle.raw();
        let old = to_raw(&raw.get(&key));
        let new = to_raw(&value);
        let stored = if self.shallow { value } else { new.clone() };

        let had_key = match key {
            PropKey::Index(idx) if raw.is_array() => idx < raw.len(),
            _ => raw.has_own(&key),
        };
        if !raw.set(key.clone(), stored)? {
            return Err(ReactiveError::NotExtensible {
                key: key.to_string(),
            });
        }

        let Some(rt) = handle.runtime() else {
            return Ok(());
        };
        if !had_key {
            rt.trigger(&raw, Some(&TrackKey::Prop(key)), TriggerOp::Add, Some(&new));
        } else if has_changed(&new, &old) {
            rt.trigger(&raw, Some(&TrackKey::Prop(key)), TriggerOp::Set, Some(&new));
        }
        Ok(())
    }

    fn delete_property(&self, handle: &Handle, key: &PropKey) -> Result<bool> {
        let raw = handle.raw();
        let had_key = raw.has_own(key);
        let deleted = raw.delete(key)?;
        if deleted
            && had_key
            && let Some(rt) = handle.runtime()
        {
            rt.trigger(
                &raw,
                Some(&TrackKey::Prop(key.clone())),
                TriggerOp::Delete,
                None,
            );
        }
        Ok(deleted)
    }

    fn has(&self, handle: &Handle, key: &PropKey) -> bool {
        let result = handle.raw().has_own(key);
        track_key(handle, key);
        result
    }

    fn own_keys(&self, handle: &Handle) -> Vec<PropKey> {
        let raw = handle.raw();
        if let Some(rt) = handle.runtime() {
            let key = if raw.is_array() {
                TrackKey::length()
            } else {
                TrackKey::Iterate
            };
            rt.track(&raw, key);
        }
        raw.own_keys()
    }
}

// ─── Readonly ────────────────────────────────────────────────────────────────

impl ObjectHandler for ReadonlyHandler {
    fn get(&self, handle: &Handle, key: &PropKey) -> Value {
        let value = match handle.target() {
            Target::Raw(raw) => raw.get(key),
            Target::Observed(inner) => inner.get(key),
        };
        if self.shallow || key.is_builtin_symbol() {
            return value;
        }
        wrap_nested(handle, value, Variant::Readonly)
    }

    fn set(&self, handle: &Handle, key: PropKey, _value: Value) -> Result<()> {
        handle.warn_readonly("set", &key);
        Ok(())
    }

    fn delete_property(&self, handle: &Handle, key: &PropKey) -> Result<bool> {
        handle.warn_readonly("delete", key);
        Ok(true)
    }

    fn has(&self, handle: &Handle, key: &PropKey) -> bool {
        match handle.target() {
            Target::Raw(raw) => raw.has_own(key),
            Target::Observed(inner) => inner.has(key),
        }
    }

    fn own_keys(&self, handle: &Handle) -> Vec<PropKey> {
        match handle.target() {
            Target::Raw(raw) => raw.own_keys(),
            Target::Observed(inner) => inner.own_keys(),
        }
    }
}
