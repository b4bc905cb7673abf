#![forbid(unsafe_code)]

//! Array instrumentation on [`Handle`].
//!
//! Search methods on mutable views track `"length"` and every index, then retry with the raw
//! form of the argument when the first search misses, so a handle finds the
//! raw element it stands for.
//!
//! Mutators run with tracking paused: their internal length and element
//! reads must not subscribe the calling effect, or an effect that pushes
//! onto an array it also measures would re-trigger itself. Element moves go
//! through the handle's own `set`/`delete`, so each move triggers exactly as
//! the equivalent individual write would.

use crate::dep::TrackKey;
use crate::error::{ReactiveError, Result};
use crate::handle::{Handle, Target, to_raw};
use crate::object::ObjectKind;
use crate::value::{PropKey, Value};

impl Handle {
    fn require_array(&self, operation: &'static str) -> Result<()> {
        let kind = self.kind();
        if kind != ObjectKind::Array {
            return Err(ReactiveError::kind_mismatch(operation, kind));
        }
        Ok(())
    }

    /// Track the whole array for a search and snapshot its raw elements.
    /// Readonly views over raw data track nothing; views over a handle
    /// track through it.
    fn tracked_elements(&self) -> Option<Vec<Value>> {
        if let Target::Observed(inner) = self.target() {
            return inner.tracked_elements();
        }
        if !self.is_array() {
            return None;
        }
        let raw = self.raw();
        let len = raw.len();
        if !self.variant().is_readonly()
            && let Some(rt) = self.runtime()
        {
            rt.track(&raw, TrackKey::length());
            for idx in 0..len {
                rt.track(&raw, TrackKey::from(idx));
            }
        }
        Some(
            (0..len)
                .map(|idx| raw.get(&PropKey::Index(idx)))
                .collect(),
        )
    }

    fn search(
        &self,
        value: &Value,
        find: impl Fn(&[Value], &Value) -> Option<usize>,
    ) -> Option<usize> {
        let elements = self.tracked_elements()?;
        find(&elements, value).or_else(|| {
            let raw = to_raw(value);
            if raw.same_value(value) {
                None
            } else {
                find(&elements, &raw)
            }
        })
    }

    /// Whether the array contains `value` (same-value-zero).
    #[must_use]
    pub fn includes(&self, value: impl Into<Value>) -> bool {
        self.search(&value.into(), |items, needle| {
            items.iter().position(|item| item == needle)
        })
        .is_some()
    }

    /// First index holding `value` (strict equality).
    #[must_use]
    pub fn index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), |items, needle| {
            items.iter().position(|item| item.strict_equals(needle))
        })
    }

    /// Last index holding `value` (strict equality).
    #[must_use]
    pub fn last_index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), |items, needle| {
            items.iter().rposition(|item| item.strict_equals(needle))
        })
    }

    /// Run a mutator with tracking paused. Readonly views warn and yield
    /// `fallback` instead.
    fn mutate<R>(
        &self,
        operation: &'static str,
        fallback: impl FnOnce() -> R,
        body: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        self.require_array(operation)?;
        if self.variant().is_readonly() {
            self.warn_readonly(operation, &PropKey::length());
            return Ok(fallback());
        }
        match self.runtime() {
            Some(rt) => {
                let _paused = rt.pause_guard();
                body()
            }
            None => body(),
        }
    }

    fn raw_len(&self) -> usize {
        self.raw().len()
    }

    fn raw_at(&self, idx: usize) -> Value {
        self.raw().get(&PropKey::Index(idx))
    }

    /// Append values, returning the new length.
    pub fn push<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<usize> {
        self.mutate(
            "push",
            || self.raw_len(),
            || {
                let mut len = self.raw_len();
                for value in values {
                    self.set(len, value)?;
                    len += 1;
                }
                self.set(PropKey::length(), len)?;
                Ok(len)
            },
        )
    }

    /// Remove and return the last element (`Undefined` when empty).
    pub fn pop(&self) -> Result<Value> {
        self.mutate(
            "pop",
            || Value::Undefined,
            || {
                let len = self.raw_len();
                if len == 0 {
                    self.set(PropKey::length(), 0)?;
                    return Ok(Value::Undefined);
                }
                let last = self.get(len - 1);
                self.delete(len - 1)?;
                self.set(PropKey::length(), len - 1)?;
                Ok(last)
            },
        )
    }

    /// Remove and return the first element (`Undefined` when empty).
    pub fn shift(&self) -> Result<Value> {
        self.mutate(
            "shift",
            || Value::Undefined,
            || {
                let len = self.raw_len();
                if len == 0 {
                    self.set(PropKey::length(), 0)?;
                    return Ok(Value::Undefined);
                }
                let first = self.get(0);
                for idx in 1..len {
                    self.set(idx - 1, self.raw_at(idx))?;
                }
                self.delete(len - 1)?;
                self.set(PropKey::length(), len - 1)?;
                Ok(first)
            },
        )
    }

    /// Prepend values, returning the new length.
    pub fn unshift<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<usize> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.mutate(
            "unshift",
            || self.raw_len(),
            || {
                let len = self.raw_len();
                let count = values.len();
                if count > 0 {
                    for idx in (0..len).rev() {
                        self.set(idx + count, self.raw_at(idx))?;
                    }
                    for (offset, value) in values.into_iter().enumerate() {
                        self.set(offset, value)?;
                    }
                }
                self.set(PropKey::length(), len + count)?;
                Ok(len + count)
            },
        )
    }

    /// Remove `delete_count` elements starting at `start` and insert `items`
    /// in their place. Returns the removed elements.
    ///
    /// `start` and `delete_count` are clamped to the array bounds.
    pub fn splice<V: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = V>,
    ) -> Result<Vec<Value>> {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.mutate("splice", Vec::new, || {
            let len = self.raw_len();
            let start = start.min(len);
            let delete_count = delete_count.min(len - start);
            let item_count = items.len();

            let removed: Vec<Value> = (start..start + delete_count)
                .map(|idx| self.get(idx))
                .collect();

            if item_count < delete_count {
                for idx in start..len - delete_count {
                    self.set(idx + item_count, self.raw_at(idx + delete_count))?;
                }
                for idx in (len - delete_count + item_count..len).rev() {
                    self.delete(idx)?;
                }
            } else if item_count > delete_count {
                for idx in (start..len - delete_count).rev() {
                    self.set(idx + item_count, self.raw_at(idx + delete_count))?;
                }
            }
            for (offset, item) in items.into_iter().enumerate() {
                self.set(start + offset, item)?;
            }
            self.set(PropKey::length(), len - delete_count + item_count)?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::{Handle, RawObject, Runtime, Value};

    fn numbers(handle: &Handle) -> Vec<f64> {
        let raw = handle.raw();
        (0..raw.len())
            .map(|idx| raw.get(&idx.into()).as_number().unwrap_or(f64::NAN))
            .collect()
    }

    fn array(rt: &Runtime, items: &[i32]) -> Handle {
        rt.reactive(RawObject::array(items.iter().copied()))
            .into_handle()
            .unwrap()
    }

    #[test]
    fn push_and_pop() {
        let rt = Runtime::new();
        let arr = array(&rt, &[1, 2]);
        assert_eq!(arr.push([3, 4]).unwrap(), 4);
        assert_eq!(numbers(&arr), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(arr.pop().unwrap(), Value::from(4));
        assert_eq!(numbers(&arr), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn shift_and_unshift() {
        let rt = Runtime::new();
        let arr = array(&rt, &[1, 2, 3]);
        assert_eq!(arr.shift().unwrap(), Value::from(1));
        assert_eq!(numbers(&arr), vec![2.0, 3.0]);
        assert_eq!(arr.unshift([7, 8]).unwrap(), 4);
        assert_eq!(numbers(&arr), vec![7.0, 8.0, 2.0, 3.0]);
        let empty = array(&rt, &[]);
        assert!(empty.shift().unwrap().is_undefined());
        assert!(empty.pop().unwrap().is_undefined());
    }

    #[test]
    fn splice_shrinks_grows_and_replaces() {
        let rt = Runtime::new();
        let arr = array(&rt, &[1, 2, 3, 4, 5]);
        let removed = arr.splice(1, 2, Vec::<Value>::new()).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(numbers(&arr), vec![1.0, 4.0, 5.0]);

        arr.splice(1, 0, [9, 9]).unwrap();
        assert_eq!(numbers(&arr), vec![1.0, 9.0, 9.0, 4.0, 5.0]);

        arr.splice(3, 1, [6]).unwrap();
        assert_eq!(numbers(&arr), vec![1.0, 9.0, 9.0, 6.0, 5.0]);

        let removed = arr.splice(10, 3, [0]).unwrap();
        assert!(removed.is_empty());
        assert_eq!(numbers(&arr), vec![1.0, 9.0, 9.0, 6.0, 5.0, 0.0]);
    }

    #[test]
    fn push_inside_length_watcher_does_not_self_trigger() {
        let rt = Runtime::new();
        let arr = array(&rt, &[]);
        let runs = Rc::new(Cell::new(0));
        let (a, r) = (arr.clone(), Rc::clone(&runs));
        let pusher = rt.effect(move || {
            a.push([1]).unwrap();
            r.set(r.get() + 1);
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(pusher.dep_count(), 0);

        let watched = Rc::new(Cell::new(0));
        let (a, w) = (arr.clone(), Rc::clone(&watched));
        let watcher = rt.effect(move || w.set(a.len()));
        assert_eq!(watched.get(), 1);
        arr.push([2]).unwrap();
        assert_eq!(watched.get(), 2);
        pusher.stop();
        watcher.stop();
    }

    #[test]
    fn search_finds_raw_element_by_handle() {
        let rt = Runtime::new();
        let item = RawObject::new();
        let arr = rt
            .reactive(RawObject::array([Value::from(&item), Value::from(f64::NAN)]))
            .into_handle()
            .unwrap();
        let wrapped = arr.get(0);
        assert!(wrapped.as_handle().is_some());
        assert!(arr.includes(wrapped.clone()));
        assert_eq!(arr.index_of(wrapped), Some(0));
        assert!(arr.includes(&item));
        assert!(arr.includes(f64::NAN));
        assert_eq!(arr.index_of(f64::NAN), None);
        assert_eq!(arr.last_index_of(&item), Some(0));
    }

    #[test]
    fn search_tracks_every_index() {
        let rt = Runtime::new();
        let arr = array(&rt, &[1, 2, 3]);
        let a = arr.clone();
        let effect = rt.effect(move || {
            let _ = a.includes(3);
        });
        assert_eq!(effect.dep_count(), 4);
        arr.set(1, 5).unwrap();
        assert_eq!(effect.run_count(), 2);
        effect.stop();
    }

    #[test]
    fn readonly_search_tracks_only_through_a_handle() {
        let rt = Runtime::new();
        let raw = RawObject::array([1, 2, 3]);
        let ro = rt.readonly(&raw).into_handle().unwrap();
        let effect = rt.effect(move || {
            let _ = ro.includes(3);
            let _ = ro.index_of(2);
        });
        assert_eq!(effect.dep_count(), 0);
        let reactive = rt.reactive(&raw).into_handle().unwrap();
        reactive.set(1, 9).unwrap();
        assert_eq!(effect.run_count(), 1);

        let view = rt.readonly(reactive.clone()).into_handle().unwrap();
        let over_handle = rt.effect(move || {
            let _ = view.last_index_of(9);
        });
        assert_eq!(over_handle.dep_count(), 4);
        reactive.set(0, 7).unwrap();
        assert_eq!(over_handle.run_count(), 2);
        effect.stop();
        over_handle.stop();
    }

    #[test]
    fn mutators_on_non_arrays_fail() {
        let rt = Runtime::new();
        let obj = rt.reactive(RawObject::new()).into_handle().unwrap();
        assert!(obj.push([1]).is_err());
        assert!(!obj.includes(1));
        assert_eq!(obj.index_of(1), None);
    }

    #[test]
    fn readonly_mutators_change_nothing() {
        let rt = Runtime::new();
        let raw = RawObject::array([1, 2]);
        let ro = rt.readonly(&raw).into_handle().unwrap();
        assert_eq!(ro.push([3]).unwrap(), 2);
        assert!(ro.pop().unwrap().is_undefined());
        assert!(ro.splice(0, 1, [9]).unwrap().is_empty());
        assert_eq!(raw.len(), 2);
    }
}
