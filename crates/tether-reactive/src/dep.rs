#![forbid(unsafe_code)]

//! The dependency store: raw object identity → tracked key → subscribers.
//!
//! # Design
//!
//! A [`Dep`] is one subscriber set. It holds its effects strongly, keyed by
//! [`EffectId`] in insertion order; each effect holds the deps it belongs to
//! weakly, so the link is bidirectional without an ownership cycle through
//! the store. Deps are created lazily on first `track` and are never removed
//! proactively: an effect's cleanup empties its entries, and entries for
//! dropped raw objects are pruned on later insertions.
//!
//! # Invariants
//!
//! 1. For a live raw object, at most one `Dep` exists per [`TrackKey`].
//! 2. An effect appears in a given `Dep` at most once.
//! 3. If effect `e` is in dep `d`, then `d` is in `e`'s subscription list.
//!
//! # Failure Modes
//!
//! - **Raw object dropped**: its entry stays until the next prune pass; the
//!   deps remain valid and simply never trigger again.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, RandomState};
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::effect::{Effect, EffectId};
use crate::object::{ObjectKind, RawObject, WeakObject};
use crate::shared::ObjectId;
use crate::value::{PropKey, Value};

/// Number of new targets inserted between prune passes.
const PRUNE_INTERVAL: usize = 64;

/// Key a read is recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// A property of a plain object or an element (or `"length"`) of an array.
    Prop(PropKey),
    /// A map key or set value.
    Entry(Value),
    /// The shape of the whole target: enumeration, size, value iteration.
    Iterate,
    /// The key set of a keyed collection (key-only iteration).
    MapKeyIterate,
}

impl TrackKey {
    #[must_use]
    pub fn length() -> Self {
        Self::Prop(PropKey::length())
    }
}

impl From<PropKey> for TrackKey {
    fn from(key: PropKey) -> Self {
        Self::Prop(key)
    }
}

impl From<&str> for TrackKey {
    fn from(key: &str) -> Self {
        Self::Prop(PropKey::from(key))
    }
}

impl From<usize> for TrackKey {
    fn from(idx: usize) -> Self {
        Self::Prop(PropKey::from(idx))
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prop(key) => write!(f, "{key}"),
            Self::Entry(value) => write!(f, "{value:?}"),
            Self::Iterate => f.write_str("<iterate>"),
            Self::MapKeyIterate => f.write_str("<map-key-iterate>"),
        }
    }
}

/// Classification of a write, deciding which extra deps it invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerOp {
    /// A key that did not exist was created.
    Add,
    /// An existing key's value changed.
    Set,
    /// An existing key was removed.
    Delete,
    /// Every entry of a collection was removed.
    Clear,
}

impl TriggerOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }
}

// ---------------------------------------------------------------------------
// Dep
// ---------------------------------------------------------------------------

/// A subscriber set.
#[derive(Default)]
pub(crate) struct DepCell {
    subscribers: RefCell<IndexMap<EffectId, Effect, RandomState>>,
}

pub(crate) type Dep = Rc<DepCell>;

impl DepCell {
    pub(crate) fn new_dep() -> Dep {
        Rc::new(Self::default())
    }

    /// Add `effect`. Returns `false` if it was already subscribed.
    pub(crate) fn subscribe(&self, effect: &Effect) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        if subs.contains_key(&effect.id()) {
            return false;
        }
        subs.insert(effect.id(), effect.clone());
        true
    }

    pub(crate) fn unsubscribe(&self, id: EffectId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Snapshot of the current subscribers, in subscription order.
    pub(crate) fn effects(&self) -> Vec<Effect> {
        self.subscribers.borrow().values().cloned().collect()
    }
}

impl std::fmt::Debug for DepCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.subscribers.borrow().keys())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct TargetDeps {
    target: WeakObject,
    kind: ObjectKind,
    keys: IndexMap<TrackKey, Dep, RandomState>,
}

/// Two-level identity map from raw objects to their per-key deps.
#[derive(Default)]
pub(crate) struct DepStore {
    targets: AHashMap<ObjectId, TargetDeps>,
    inserts_since_prune: usize,
}

impl DepStore {
    /// Find or create the dep for `(target, key)`.
    pub(crate) fn dep_for(&mut self, target: &RawObject, key: TrackKey) -> Dep {
        if !self.targets.contains_key(&target.id()) {
            self.inserts_since_prune += 1;
            if self.inserts_since_prune >= PRUNE_INTERVAL {
                self.prune();
            }
        }
        let entry = self
            .targets
            .entry(target.id())
            .or_insert_with(|| TargetDeps {
                target: target.downgrade(),
                kind: target.kind(),
                keys: IndexMap::default(),
            });
        Rc::clone(entry.keys.entry(key).or_insert_with(DepCell::new_dep))
    }

    /// The deps a write invalidates.
    ///
    /// Returns an empty list for targets that were never tracked.
    pub(crate) fn deps_to_trigger(
        &self,
        target: &RawObject,
        key: Option<&TrackKey>,
        op: TriggerOp,
        new_value: Option<&Value>,
    ) -> SmallVec<[Dep; 4]> {
        let mut deps = SmallVec::new();
        let Some(entry) = self.targets.get(&target.id()) else {
            return deps;
        };
        let is_array = entry.kind == ObjectKind::Array;
        let is_map = entry.kind == ObjectKind::Map;

        if op == TriggerOp::Clear {
            deps.extend(entry.keys.values().cloned());
            return deps;
        }

        match key {
            Some(TrackKey::Prop(prop)) if is_array && prop.is_length() => {
                let new_len = new_value
                    .and_then(Value::as_number)
                    .unwrap_or(f64::INFINITY);
                for (tracked, dep) in &entry.keys {
                    let hit = match tracked {
                        TrackKey::Prop(PropKey::Index(idx)) => *idx as f64 >= new_len,
                        TrackKey::Prop(prop) => prop.is_length(),
                        _ => false,
                    };
                    if hit {
                        deps.push(Rc::clone(dep));
                    }
                }
                return deps;
            }
            Some(key) => {
                if let Some(dep) = entry.keys.get(key) {
                    deps.push(Rc::clone(dep));
                }
            }
            None => {}
        }

        let mut push = |key: &TrackKey| {
            if let Some(dep) = entry.keys.get(key) {
                deps.push(Rc::clone(dep));
            }
        };
        match op {
            TriggerOp::Add | TriggerOp::Delete if !is_array => {
                push(&TrackKey::Iterate);
                if is_map {
                    push(&TrackKey::MapKeyIterate);
                }
            }
            TriggerOp::Add if matches!(key, Some(TrackKey::Prop(PropKey::Index(_)))) => {
                push(&TrackKey::length());
            }
            TriggerOp::Set if is_map => push(&TrackKey::Iterate),
            _ => {}
        }
        deps
    }

    pub(crate) fn subscriber_count(&self, target: &RawObject, key: &TrackKey) -> usize {
        self.targets
            .get(&target.id())
            .and_then(|entry| entry.keys.get(key))
            .map_or(0, |dep| dep.len())
    }

    /// Number of live raw objects with at least one dep entry.
    pub(crate) fn target_count(&self) -> usize {
        self.targets
            .values()
            .filter(|entry| entry.target.is_alive())
            .count()
    }

    fn prune(&mut self) {
        let before = self.targets.len();
        self.targets.retain(|_, entry| entry.target.is_alive());
        self.inserts_since_prune = 0;
        tracing::trace!(
            pruned = before - self.targets.len(),
            remaining = self.targets.len(),
            "dep store pruned"
        );
    }
}

impl std::fmt::Debug for DepStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepStore")
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_hit(store: &DepStore, target: &RawObject, deps: &[Dep]) -> Vec<TrackKey> {
        let entry = store.targets.get(&target.id()).expect("tracked target");
        entry
            .keys
            .iter()
            .filter(|(_, dep)| deps.iter().any(|d| Rc::ptr_eq(d, dep)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    #[test]
    fn untracked_target_yields_nothing() {
        let store = DepStore::default();
        let obj = RawObject::new();
        let deps = store.deps_to_trigger(
            &obj,
            Some(&TrackKey::from("a")),
            TriggerOp::Set,
            None,
        );
        assert!(deps.is_empty());
    }

    #[test]
    fn dep_for_is_stable() {
        let mut store = DepStore::default();
        let obj = RawObject::new();
        let a = store.dep_for(&obj, "a".into());
        let b = store.dep_for(&obj, "a".into());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(store.target_count(), 1);
    }

    #[test]
    fn plain_add_hits_iterate_but_set_does_not() {
        let mut store = DepStore::default();
        let obj = RawObject::new();
        store.dep_for(&obj, "a".into());
        store.dep_for(&obj, TrackKey::Iterate);

        let add = store.deps_to_trigger(&obj, Some(&"a".into()), TriggerOp::Add, None);
        assert_eq!(
            keys_hit(&store, &obj, &add),
            vec![TrackKey::from("a"), TrackKey::Iterate]
        );
        let set = store.deps_to_trigger(&obj, Some(&"a".into()), TriggerOp::Set, None);
        assert_eq!(keys_hit(&store, &obj, &set), vec![TrackKey::from("a")]);
    }

    #[test]
    fn map_set_hits_iterate_but_not_key_iterate() {
        let mut store = DepStore::default();
        let map = RawObject::map([("k", 1)]);
        let k = TrackKey::Entry(Value::from("k"));
        store.dep_for(&map, k.clone());
        store.dep_for(&map, TrackKey::Iterate);
        store.dep_for(&map, TrackKey::MapKeyIterate);

        let set = store.deps_to_trigger(&map, Some(&k), TriggerOp::Set, None);
        assert_eq!(
            keys_hit(&store, &map, &set),
            vec![k.clone(), TrackKey::Iterate]
        );
        let add = store.deps_to_trigger(&map, Some(&k), TriggerOp::Add, None);
        assert_eq!(add.len(), 3);
        let del = store.deps_to_trigger(&map, Some(&k), TriggerOp::Delete, None);
        assert_eq!(del.len(), 3);
    }

    #[test]
    fn array_length_truncation_hits_removed_indices() {
        let mut store = DepStore::default();
        let arr = RawObject::array([1, 2, 3]);
        store.dep_for(&arr, 0usize.into());
        store.dep_for(&arr, 2usize.into());
        store.dep_for(&arr, TrackKey::length());

        let shrink = store.deps_to_trigger(
            &arr,
            Some(&TrackKey::length()),
            TriggerOp::Set,
            Some(&Value::from(1)),
        );
        assert_eq!(
            keys_hit(&store, &arr, &shrink),
            vec![TrackKey::from(2usize), TrackKey::length()]
        );

        let grow = store.deps_to_trigger(
            &arr,
            Some(&TrackKey::length()),
            TriggerOp::Set,
            Some(&Value::from(5)),
        );
        assert_eq!(keys_hit(&store, &arr, &grow), vec![TrackKey::length()]);
    }

    #[test]
    fn array_index_add_hits_length() {
        let mut store = DepStore::default();
        let arr = RawObject::array([1]);
        store.dep_for(&arr, TrackKey::length());
        store.dep_for(&arr, TrackKey::Iterate);
        let add = store.deps_to_trigger(&arr, Some(&1usize.into()), TriggerOp::Add, None);
        assert_eq!(keys_hit(&store, &arr, &add), vec![TrackKey::length()]);
    }

    #[test]
    fn clear_hits_everything() {
        let mut store = DepStore::default();
        let set = RawObject::set_of([1, 2]);
        store.dep_for(&set, TrackKey::Entry(Value::from(1)));
        store.dep_for(&set, TrackKey::Iterate);
        let deps = store.deps_to_trigger(&set, None, TriggerOp::Clear, None);
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn dropped_targets_are_pruned() {
        let mut store = DepStore::default();
        for _ in 0..PRUNE_INTERVAL {
            let obj = RawObject::new();
            store.dep_for(&obj, "a".into());
        }
        let keep = RawObject::new();
        store.dep_for(&keep, "a".into());
        assert!(store.targets.len() <= 2);
        assert_eq!(store.target_count(), 1);
    }
}
