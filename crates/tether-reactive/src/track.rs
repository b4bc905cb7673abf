#![forbid(unsafe_code)]

//! Track and trigger: subscription on read, fan-out on write.
//!
//! # Invariants
//!
//! 1. `track` is a no-op unless tracking is enabled and an effect is active.
//! 2. `track` is idempotent per (target, key, effect) within one run.
//! 3. `trigger` re-runs each collected effect at most once, in first-seen
//!    order, after every internal borrow has been released.
//! 4. Nested fan-outs deeper than `max_trigger_depth` are skipped.

use ahash::RandomState;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::dep::{Dep, TrackKey, TriggerOp};
use crate::effect::{Effect, EffectId};
use crate::object::RawObject;
use crate::runtime::RuntimeInner;
use crate::value::Value;

impl RuntimeInner {
    pub(crate) fn track(&self, target: &RawObject, key: TrackKey) {
        if !self.is_tracking() {
            return;
        }
        let dep = self.store.borrow_mut().dep_for(target, key);
        self.track_dep(&dep);
    }

    /// Subscribe the active effect to `dep`, linking both ways.
    pub(crate) fn track_dep(&self, dep: &Dep) {
        if !self.should_track() {
            return;
        }
        let Some(effect) = self.active_effect() else {
            return;
        };
        if dep.subscribe(&effect) {
            effect.push_dep(dep);
            trace!(effect = effect.id().raw(), "tracked");
        }
    }

    pub(crate) fn trigger(
        &self,
        target: &RawObject,
        key: Option<&TrackKey>,
        op: TriggerOp,
        new_value: Option<&Value>,
    ) {
        let deps = self
            .store
            .borrow()
            .deps_to_trigger(target, key, op, new_value);
        if deps.is_empty() {
            return;
        }
        let mut effects: IndexMap<EffectId, Effect, RandomState> = IndexMap::default();
        for dep in &deps {
            for effect in dep.effects() {
                effects.entry(effect.id()).or_insert(effect);
            }
        }
        debug!(
            object = %target.id(),
            key = %key.map_or_else(|| "<none>".to_string(), ToString::to_string),
            op = op.as_str(),
            effects = effects.len(),
            "trigger"
        );
        self.run_effects(effects.into_values());
    }

    /// Re-run every subscriber of a single dep.
    pub(crate) fn trigger_dep(&self, dep: &Dep) {
        let effects = dep.effects();
        if effects.is_empty() {
            return;
        }
        debug!(effects = effects.len(), "trigger ref");
        self.run_effects(effects);
    }

    fn run_effects(&self, effects: impl IntoIterator<Item = Effect>) {
        let depth = self.trigger_depth.get();
        if depth >= self.config().max_trigger_depth {
            warn!(
                depth,
                limit = self.config().max_trigger_depth,
                "trigger depth limit reached; skipping nested effect runs"
            );
            return;
        }
        self.trigger_depth.set(depth + 1);
        let _depth = DepthGuard { runtime: self };
        for effect in effects {
            if !effect.is_active() {
                continue;
            }
            match effect.scheduler() {
                Some(scheduler) => scheduler(&effect),
                None => effect.run(),
            }
        }
    }
}

struct DepthGuard<'a> {
    runtime: &'a RuntimeInner,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let depth = self.runtime.trigger_depth.get();
        self.runtime.trigger_depth.set(depth.saturating_sub(1));
    }
}
