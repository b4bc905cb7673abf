#![forbid(unsafe_code)]

//! Fine-grained reactivity: observable objects, collections, effects and refs.
//!
//! A [`Runtime`] owns the dependency graph. Wrapping a [`RawObject`] with
//! [`Runtime::reactive`] (or one of its siblings) yields a [`Handle`] whose
//! reads are recorded against the currently running [`Effect`], and whose
//! writes re-run exactly the effects that read what changed.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_reactive::{RawObject, Runtime};
//!
//! let rt = Runtime::new();
//! let state = rt.reactive(RawObject::from_pairs([("count", 0)]));
//! let state = state.as_handle().cloned().unwrap();
//!
//! let seen = Rc::new(Cell::new(0.0));
//! let (s, out) = (state.clone(), Rc::clone(&seen));
//! let _effect = rt.effect(move || {
//!     out.set(s.get("count").as_number().unwrap_or_default());
//! });
//!
//! state.set("count", 3).unwrap();
//! assert_eq!(seen.get(), 3.0);
//! ```
//!
//! # Architecture
//!
//! - [`object`]: raw plain objects, arrays, maps and sets. Never tracked.
//! - [`handle`] and the property handlers: tracked views over raw objects in
//!   four [`Variant`]s.
//! - [`collection_handlers`]: method-level access to maps and sets.
//! - [`array`]: identity-aware search and length-stable mutators.
//! - [`dep`] and [`effect`]: the subscription graph.
//! - [`refs`]: single-slot observable values.
//!
//! Everything is single-threaded: handles, refs and effects are `!Send`.
//!
//! # Invariants
//!
//! 1. An effect re-runs only when a key it read in its latest run changes.
//! 2. Every raw object maps to at most one live handle per variant.
//! 3. A trigger runs each subscribed effect at most once.
//! 4. Readonly views never mutate and never re-run anything.

pub mod array;
mod base_handlers;
pub mod collection_handlers;
pub mod config;
pub mod dep;
pub mod effect;
pub mod error;
pub mod handle;
pub mod object;
pub mod refs;
pub mod runtime;
pub mod shared;
mod track;
pub mod value;

pub use collection_handlers::{Collection, Entries, Iter};
pub use config::{EffectOptions, RuntimeConfig, Scheduler};
pub use dep::{TrackKey, TriggerOp};
pub use effect::{Effect, EffectId};
pub use error::{ReactiveError, Result};
pub use handle::{Handle, Variant, is_proxy, is_reactive, is_readonly, is_shallow, to_raw};
pub use object::{ObjectKind, RawObject};
pub use refs::{Ref, RefHooks, RefsProxy, is_ref, unref};
pub use runtime::Runtime;
pub use shared::{ObjectId, has_changed, is_integer_key};
pub use value::{PropKey, Symbol, Value};
