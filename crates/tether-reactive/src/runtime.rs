#![forbid(unsafe_code)]

//! The reactive runtime: an explicit context for tracking and triggering.
//!
//! # Design
//!
//! A [`Runtime`] owns all state that a tracked read or write consults: the
//! dependency store, the active-effect slot, the tracking flag and its
//! save/restore stack, the per-variant handle caches, and the `mark_raw`
//! side table. Handles, effects and refs created by a runtime keep a weak
//! back-link to it, so two runtimes never observe each other and nothing
//! they create keeps the runtime alive.
//!
//! # Invariants
//!
//! 1. For a given (target identity, variant) pair at most one live
//!    [`Handle`] exists; re-wrapping returns it.
//! 2. Tracking is enabled whenever the pause stack is empty and no effect is
//!    running with tracking paused.
//! 3. Cache entries never keep a raw object or handle alive.
//!
//! # Failure Modes
//!
//! - **Runtime dropped while handles survive**: the handles keep working as
//!   untracked views over their raw objects; nested reads are no longer
//!   wrapped.
//! - **Effect captures its runtime**: the runtime lives until that effect
//!   is stopped, since deps hold their effects strongly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use tracing::trace;

use crate::config::{EffectOptions, RuntimeConfig};
use crate::dep::{DepStore, TrackKey, TriggerOp};
use crate::effect::Effect;
use crate::handle::{Handle, Target, Variant, WeakHandle};
use crate::object::{RawObject, WeakObject};
use crate::shared::ObjectId;
use crate::value::Value;

/// New entries inserted into a cache between prune passes.
const CACHE_PRUNE_INTERVAL: usize = 64;

// ─── Caches ──────────────────────────────────────────────────────────────────

/// Identity-keyed, non-owning map from wrap targets to their handles.
#[derive(Default)]
struct HandleCache {
    entries: AHashMap<ObjectId, WeakHandle>,
    inserts_since_prune: usize,
}

impl HandleCache {
    fn get(&self, id: ObjectId) -> Option<Handle> {
        self.entries.get(&id).and_then(WeakHandle::upgrade)
    }

    fn insert(&mut self, id: ObjectId, handle: &Handle) {
        self.inserts_since_prune += 1;
        if self.inserts_since_prune >= CACHE_PRUNE_INTERVAL {
            self.entries.retain(|_, weak| weak.is_alive());
            self.inserts_since_prune = 0;
        }
        self.entries.insert(id, handle.downgrade());
    }

    fn live_len(&self) -> usize {
        self.entries.values().filter(|weak| weak.is_alive()).count()
    }
}

/// Non-owning set of raw objects opted out of wrapping.
#[derive(Default)]
struct RawMarks {
    entries: AHashMap<ObjectId, WeakObject>,
    inserts_since_prune: usize,
}

impl RawMarks {
    fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    fn insert(&mut self, raw: &RawObject) {
        self.inserts_since_prune += 1;
        if self.inserts_since_prune >= CACHE_PRUNE_INTERVAL {
            self.entries.retain(|_, weak| weak.is_alive());
            self.inserts_since_prune = 0;
        }
        self.entries.insert(raw.id(), raw.downgrade());
    }
}

// ─── Runtime state ───────────────────────────────────────────────────────────

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    pub(crate) store: RefCell<DepStore>,
    active_effect: RefCell<Option<Effect>>,
    should_track: Cell<bool>,
    track_stack: RefCell<Vec<bool>>,
    pub(crate) trigger_depth: Cell<usize>,
    /// One cache per variant, indexed by [`Variant::index`].
    handles: [RefCell<HandleCache>; 4],
    /// Raw objects that must never be wrapped.
    skip: RefCell<RawMarks>,
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            store: RefCell::new(DepStore::default()),
            active_effect: RefCell::new(None),
            should_track: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            trigger_depth: Cell::new(0),
            handles: Default::default(),
            skip: RefCell::default(),
        }
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn active_effect(&self) -> Option<Effect> {
        self.active_effect.borrow().clone()
    }

    pub(crate) fn replace_active_effect(&self, effect: Option<Effect>) -> Option<Effect> {
        self.active_effect.replace(effect)
    }

    pub(crate) fn should_track(&self) -> bool {
        self.should_track.get()
    }

    pub(crate) fn replace_should_track(&self, enabled: bool) -> bool {
        self.should_track.replace(enabled)
    }

    /// Whether a read right now would be recorded.
    pub(crate) fn is_tracking(&self) -> bool {
        self.should_track.get() && self.active_effect.borrow().is_some()
    }

    pub(crate) fn pause_tracking(&self) {
        self.track_stack.borrow_mut().push(self.should_track.get());
        self.should_track.set(false);
    }

    pub(crate) fn reset_tracking(&self) {
        let last = self.track_stack.borrow_mut().pop();
        self.should_track.set(last.unwrap_or(true));
    }

    pub(crate) fn pause_guard(&self) -> TrackingPause<'_> {
        self.pause_tracking();
        TrackingPause { runtime: self }
    }

    pub(crate) fn is_marked_raw(&self, raw: &RawObject) -> bool {
        self.skip.borrow().contains(raw.id())
    }

    /// Wrap `value` under `variant`, reusing the cached handle if any.
    pub(crate) fn observe(self: &Rc<Self>, value: Value, variant: Variant) -> Value {
        match value {
            Value::Observed(handle) => {
                if !variant.is_readonly() || handle.variant().is_readonly() {
                    return Value::Observed(handle);
                }
                let cache = &self.handles[variant.index()];
                if let Some(cached) = cache.borrow().get(handle.id()) {
                    return Value::Observed(cached);
                }
                let id = handle.id();
                let wrapped = Handle::new(Target::Observed(handle), variant, Rc::downgrade(self));
                cache.borrow_mut().insert(id, &wrapped);
                trace!(object = %id, ?variant, "wrapped observable");
                Value::Observed(wrapped)
            }
            Value::Object(raw) => {
                let cache = &self.handles[variant.index()];
                if let Some(cached) = cache.borrow().get(raw.id()) {
                    return Value::Observed(cached);
                }
                if self.is_marked_raw(&raw) || !raw.is_extensible() {
                    return Value::Object(raw);
                }
                let id = raw.id();
                let handle = Handle::new(Target::Raw(raw), variant, Rc::downgrade(self));
                cache.borrow_mut().insert(id, &handle);
                trace!(object = %id, ?variant, "wrapped raw object");
                Value::Observed(handle)
            }
            other => other,
        }
    }
}

/// Pauses tracking until dropped.
pub(crate) struct TrackingPause<'a> {
    runtime: &'a RuntimeInner,
}

impl Drop for TrackingPause<'_> {
    fn drop(&mut self) {
        self.runtime.reset_tracking();
    }
}

// ─── Public context ──────────────────────────────────────────────────────────

/// Handle to a reactive runtime.
///
/// Cloning a `Runtime` creates a new handle to the **same** context.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tether_reactive::{RawObject, Runtime};
///
/// let rt = Runtime::new();
/// let state = rt
///     .reactive(RawObject::from_pairs([("count", 0)]))
///     .into_handle()
///     .unwrap();
///
/// let seen = Rc::new(Cell::new(0.0));
/// let (s, out) = (state.clone(), Rc::clone(&seen));
/// rt.effect(move || out.set(s.get("count").as_number().unwrap_or_default()));
///
/// state.set("count", 5).unwrap();
/// assert_eq!(seen.get(), 5.0);
/// ```
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store.borrow())
            .field("tracking", &self.inner.should_track.get())
            .field("active_effect", &self.inner.active_effect.borrow())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(config)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same runtime.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ─── Wrapping ────────────────────────────────────────────────────────

    /// Wrap `value` in an observable handle of the given variant.
    ///
    /// Primitives, refs, raw objects marked with [`mark_raw`](Self::mark_raw)
    /// and non-extensible raw objects are returned unchanged. A handle is
    /// returned unchanged unless a readonly variant is requested over a
    /// mutable one, in which case a readonly view of that handle is made.
    pub fn make_observable(&self, value: impl Into<Value>, variant: Variant) -> Value {
        self.inner.observe(value.into(), variant)
    }

    /// Deep, mutable wrapping.
    pub fn reactive(&self, value: impl Into<Value>) -> Value {
        self.make_observable(value, Variant::Reactive)
    }

    /// Mutable wrapping that returns nested objects as-is.
    pub fn shallow_reactive(&self, value: impl Into<Value>) -> Value {
        self.make_observable(value, Variant::ShallowReactive)
    }

    /// Deep, readonly wrapping.
    pub fn readonly(&self, value: impl Into<Value>) -> Value {
        self.make_observable(value, Variant::Readonly)
    }

    /// Readonly wrapping that returns nested objects as-is.
    pub fn shallow_readonly(&self, value: impl Into<Value>) -> Value {
        self.make_observable(value, Variant::ShallowReadonly)
    }

    /// Opt a raw object out of wrapping. Other values are returned unchanged.
    pub fn mark_raw(&self, value: impl Into<Value>) -> Value {
        let value = value.into();
        if let Value::Object(raw) = &value {
            self.inner.skip.borrow_mut().insert(raw);
        }
        value
    }

    // ─── Effects ─────────────────────────────────────────────────────────

    /// Create an effect and run it once.
    pub fn effect(&self, f: impl Fn() + 'static) -> Effect {
        self.effect_with(f, EffectOptions::default())
    }

    pub fn effect_with(&self, f: impl Fn() + 'static, options: EffectOptions) -> Effect {
        let effect = Effect::new(Rc::downgrade(&self.inner), f, options.scheduler);
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// The effect whose run is in progress, if any.
    #[must_use]
    pub fn active_effect(&self) -> Option<Effect> {
        self.inner.active_effect()
    }

    // ─── Tracking control ────────────────────────────────────────────────

    /// Disable tracking, saving the current state. Must be paired with
    /// [`reset_tracking`](Self::reset_tracking).
    pub fn pause_tracking(&self) {
        self.inner.pause_tracking();
    }

    /// Restore the tracking state saved by the matching
    /// [`pause_tracking`](Self::pause_tracking).
    pub fn reset_tracking(&self) {
        self.inner.reset_tracking();
    }

    /// Call `f` with tracking paused.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _paused = self.inner.pause_guard();
        f()
    }

    #[must_use]
    pub fn is_tracking_enabled(&self) -> bool {
        self.inner.should_track()
    }

    /// Record a read of `(target, key)` by the active effect.
    pub fn track(&self, target: &RawObject, key: TrackKey) {
        self.inner.track(target, key);
    }

    /// Re-run every effect that depends on `(target, key)` under `op`.
    pub fn trigger(
        &self,
        target: &RawObject,
        key: Option<TrackKey>,
        op: TriggerOp,
        new_value: Option<&Value>,
    ) {
        self.inner.trigger(target, key.as_ref(), op, new_value);
    }

    // ─── Diagnostics ─────────────────────────────────────────────────────

    /// Number of effects subscribed to `(target, key)`.
    #[must_use]
    pub fn subscriber_count(&self, target: &RawObject, key: &TrackKey) -> usize {
        self.inner.store.borrow().subscriber_count(target, key)
    }

    /// Number of live raw objects with dependency entries.
    #[must_use]
    pub fn tracked_target_count(&self) -> usize {
        self.inner.store.borrow().target_count()
    }

    /// Number of live handles across all variant caches.
    #[must_use]
    pub fn cached_handle_count(&self) -> usize {
        self.inner
            .handles
            .iter()
            .map(|cache| cache.borrow().live_len())
            .sum()
    }
}
