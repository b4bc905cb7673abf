#![forbid(unsafe_code)]

//! Runtime and effect configuration.
//!
//! [`RuntimeConfig`] is fixed when a [`Runtime`](crate::Runtime) is created.
//! Values come from `Default`, builder-style `with_*` setters, or the
//! environment via [`RuntimeConfig::from_env`]:
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `TETHER_MAX_TRIGGER_DEPTH` | `max_trigger_depth` | unsigned integer |
//! | `TETHER_WARN_READONLY` | `warn_on_readonly_mutation` | `1`/`true` or `0`/`false` |
//!
//! Unparseable values are ignored and the default is kept.

use std::env;
use std::rc::Rc;

use crate::effect::Effect;

/// Default bound on nested synchronous trigger fan-outs.
pub const DEFAULT_MAX_TRIGGER_DEPTH: usize = 100;

pub const ENV_MAX_TRIGGER_DEPTH: &str = "TETHER_MAX_TRIGGER_DEPTH";
pub const ENV_WARN_READONLY: &str = "TETHER_WARN_READONLY";

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum nesting of trigger fan-outs. A write that would re-run effects
    /// deeper than this is reported and its re-runs are skipped, which
    /// breaks cycles between two or more effects.
    pub max_trigger_depth: usize,
    /// Emit a warning when readonly data is written to.
    pub warn_on_readonly_mutation: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_trigger_depth: DEFAULT_MAX_TRIGGER_DEPTH,
            warn_on_readonly_mutation: true,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `TETHER_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(ENV_MAX_TRIGGER_DEPTH)
            && let Ok(n) = val.trim().parse()
        {
            config.max_trigger_depth = n;
        }
        if let Some(val) = lookup(ENV_WARN_READONLY) {
            let val = val.trim();
            if val == "1" || val.eq_ignore_ascii_case("true") {
                config.warn_on_readonly_mutation = true;
            } else if val == "0" || val.eq_ignore_ascii_case("false") {
                config.warn_on_readonly_mutation = false;
            }
        }
        config
    }

    #[must_use]
    pub fn with_max_trigger_depth(mut self, depth: usize) -> Self {
        self.max_trigger_depth = depth;
        self
    }

    #[must_use]
    pub fn with_readonly_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_readonly_mutation = enabled;
        self
    }
}

/// Replacement for an effect's immediate re-run.
///
/// When set, a trigger calls the scheduler with the effect instead of
/// running it; the scheduler decides when (or whether) to call
/// [`Effect::run`].
pub type Scheduler = Rc<dyn Fn(&Effect)>;

/// Options for [`Runtime::effect_with`](crate::Runtime::effect_with).
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Skip the initial run.
    pub lazy: bool,
    pub scheduler: Option<Scheduler>,
}

impl EffectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Fn(&Effect) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }
}

impl std::fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}
