#![forbid(unsafe_code)]

//! Shared predicates and identity allocation.
//!
//! Leaf utilities used by every other module: process-unique identities for
//! raw objects, handles and effects, key classification, and the change
//! predicate that decides whether a write is observable.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::Value;

// ─── Identity ────────────────────────────────────────────────────────────────

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a raw object or an observable handle.
///
/// Identity caches and the dependency store are keyed by `ObjectId`, never by
/// value, so two structurally equal objects stay independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Predicates ──────────────────────────────────────────────────────────────

/// Largest valid array index (array lengths fit in 32 bits).
pub const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

/// Whether `key` is the canonical decimal form of an array index.
///
/// `"0"` and `"42"` qualify; `"01"`, `"-1"`, `"+1"`, `"1.0"`, `"NaN"` and the
/// empty string do not.
#[must_use]
pub fn is_integer_key(key: &str) -> bool {
    parse_index(key).is_some()
}

/// Parse a canonical array index string.
#[must_use]
pub fn parse_index(key: &str) -> Option<usize> {
    let bytes = key.as_bytes();
    match bytes {
        [] => None,
        [b'0'] => Some(0),
        [b'0', ..] => None,
        _ if bytes.iter().all(u8::is_ascii_digit) => key
            .parse::<usize>()
            .ok()
            .filter(|&idx| idx <= MAX_ARRAY_INDEX),
        _ => None,
    }
}

/// Whether writing `value` over `old` is an observable change.
///
/// Uses [`Value::same_value`]: `NaN` never changes into `NaN`, while `+0` and
/// `-0` are distinct.
#[must_use]
pub fn has_changed(value: &Value, old: &Value) -> bool {
    !value.same_value(old)
}

/// Interpret a number as an array length, if it is one.
#[must_use]
pub fn as_array_length(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_are_canonical() {
        assert!(is_integer_key("0"));
        assert!(is_integer_key("7"));
        assert!(is_integer_key("4294967294"));
        assert!(!is_integer_key("4294967295"));
        assert!(!is_integer_key("01"));
        assert!(!is_integer_key("-1"));
        assert!(!is_integer_key("+1"));
        assert!(!is_integer_key("1.0"));
        assert!(!is_integer_key("NaN"));
        assert!(!is_integer_key(""));
        assert!(!is_integer_key("length"));
    }

    #[test]
    fn has_changed_uses_same_value() {
        assert!(!has_changed(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(has_changed(&Value::from(0.0), &Value::from(-0.0)));
        assert!(!has_changed(&Value::from(1), &Value::from(1.0)));
        assert!(has_changed(&Value::from("a"), &Value::from("b")));
        assert!(has_changed(&Value::Undefined, &Value::Null));
    }

    #[test]
    fn array_length_rejects_fractions_and_negatives() {
        assert_eq!(as_array_length(3.0), Some(3));
        assert_eq!(as_array_length(0.0), Some(0));
        assert_eq!(as_array_length(1.5), None);
        assert_eq!(as_array_length(-1.0), None);
        assert_eq!(as_array_length(f64::NAN), None);
        assert_eq!(as_array_length(f64::INFINITY), None);
    }

    #[test]
    fn object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }
}
