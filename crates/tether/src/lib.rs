#![forbid(unsafe_code)]

//! Tether public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use tether_reactive as reactive;

pub mod prelude {
    pub use tether_reactive::{
        Collection, Effect, EffectOptions, Handle, ObjectKind, PropKey, RawObject, ReactiveError,
        Ref, Runtime, RuntimeConfig, Value, Variant, is_proxy, is_reactive, is_readonly, is_ref,
        is_shallow, to_raw, unref,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_covers_the_common_path() {
        let rt = Runtime::new();
        let count = rt.make_ref(1);
        let state = rt.reactive(RawObject::from_pairs([("n", 1)]));
        assert!(is_reactive(&state));
        assert!(is_ref(&Value::from(count.clone())));
        assert_eq!(unref(&Value::from(count)), Value::from(1));
    }
}
