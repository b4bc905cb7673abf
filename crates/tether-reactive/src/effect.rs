#![forbid(unsafe_code)]

//! Effects: computations that re-run when what they read changes.
//!
//! # Design
//!
//! An [`Effect`] wraps a user function in shared, reference-counted storage.
//! [`run()`](Effect::run) makes it the runtime's active effect, drops every
//! subscription from the previous run, then calls the function; reads made
//! during the call subscribe it afresh. Writes re-run subscribed effects
//! synchronously, so by the time a write returns every dependent effect has
//! seen the new state.
//!
//! # Invariants
//!
//! 1. While `run()` executes the function, this effect is the active effect
//!    and tracking is enabled.
//! 2. After `run()` returns (or unwinds), the previous active effect and the
//!    previous tracking flag are restored.
//! 3. An effect never re-enters itself: if it is anywhere on the chain of
//!    running effects, `run()` returns immediately.
//! 4. Subscriptions reflect exactly the reads of the latest run.
//!
//! # Failure Modes
//!
//! - **Function panics**: context is restored by a drop guard; the
//!   subscriptions collected before the panic remain.
//! - **Runtime dropped**: `run()` calls the function without any tracking.
//! - **Retention**: a dep holds its effects strongly, so an effect lives as
//!   long as anything it read is tracked. [`stop()`](Effect::stop) releases
//!   it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::config::Scheduler;
use crate::dep::{Dep, DepCell};
use crate::runtime::RuntimeInner;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

struct EffectInner {
    id: EffectId,
    func: Box<dyn Fn()>,
    /// Deps this effect is subscribed to, for cleanup.
    deps: RefCell<Vec<Weak<DepCell>>>,
    /// The effect that was active when this one started running.
    parent: RefCell<Option<Effect>>,
    /// Cleared by `stop()`.
    active: Cell<bool>,
    scheduler: Option<Scheduler>,
    runtime: Weak<RuntimeInner>,
    runs: Cell<u64>,
}

/// A re-runnable computation.
///
/// Cloning an `Effect` creates a new handle to the **same** computation.
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.inner.active.get())
            .field("deps", &self.inner.deps.borrow().len())
            .field("runs", &self.inner.runs.get())
            .finish()
    }
}

impl Effect {
    pub(crate) fn new(
        runtime: Weak<RuntimeInner>,
        func: impl Fn() + 'static,
        scheduler: Option<Scheduler>,
    ) -> Self {
        Self {
            inner: Rc::new(EffectInner {
                id: EffectId::next(),
                func: Box::new(func),
                deps: RefCell::new(Vec::new()),
                parent: RefCell::new(None),
                active: Cell::new(true),
                scheduler,
                runtime,
                runs: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Whether both handles refer to the same effect.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// `false` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Number of times the function has been called by [`run`](Self::run).
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.inner.runs.get()
    }

    /// Number of deps this effect is currently subscribed to.
    #[must_use]
    pub fn dep_count(&self) -> usize {
        self.inner
            .deps
            .borrow()
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    pub(crate) fn scheduler(&self) -> Option<&Scheduler> {
        self.inner.scheduler.as_ref()
    }

    pub(crate) fn parent(&self) -> Option<Effect> {
        self.inner.parent.borrow().clone()
    }

    /// Record that this effect is subscribed to `dep`.
    pub(crate) fn push_dep(&self, dep: &Dep) {
        self.inner.deps.borrow_mut().push(Rc::downgrade(dep));
    }

    /// Run the function now, re-collecting its dependencies.
    pub fn run(&self) {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            self.call();
            return;
        };

        if !self.is_active() {
            let _paused = runtime.pause_guard();
            self.call();
            return;
        }

        let mut cursor = runtime.active_effect();
        while let Some(running) = cursor {
            if running.ptr_eq(self) {
                trace!(effect = self.inner.id.0, "skipping recursive effect run");
                return;
            }
            cursor = running.parent();
        }

        let _scope = RunScope::enter(&runtime, self);
        self.cleanup();
        trace!(
            effect = self.inner.id.0,
            run = self.inner.runs.get() + 1,
            "effect run"
        );
        self.call();
    }

    /// Unsubscribe from everything and stop tracking. Later runs (manual or
    /// scheduled) call the function untracked.
    pub fn stop(&self) {
        if self.inner.active.replace(false) {
            self.cleanup();
            trace!(effect = self.inner.id.0, "effect stopped");
        }
    }

    fn call(&self) {
        self.inner.runs.set(self.inner.runs.get() + 1);
        (self.inner.func)();
    }

    fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        for dep in deps {
            if let Some(dep) = dep.upgrade() {
                dep.unsubscribe(self.inner.id);
            }
        }
    }
}

/// Active-effect bookkeeping for one `run()`, undone on drop.
struct RunScope<'a> {
    runtime: &'a RuntimeInner,
    effect: &'a Effect,
    prev_effect: Option<Effect>,
    prev_should_track: bool,
}

impl<'a> RunScope<'a> {
    fn enter(runtime: &'a RuntimeInner, effect: &'a Effect) -> Self {
        let prev_effect = runtime.replace_active_effect(Some(effect.clone()));
        *effect.inner.parent.borrow_mut() = prev_effect.clone();
        let prev_should_track = runtime.replace_should_track(true);
        Self {
            runtime,
            effect,
            prev_effect,
            prev_should_track,
        }
    }
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        self.runtime.replace_active_effect(self.prev_effect.take());
        self.runtime.replace_should_track(self.prev_should_track);
        self.effect.inner.parent.borrow_mut().take();
    }
}
