#![forbid(unsafe_code)]

use thiserror::Error;

use crate::object::ObjectKind;

pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors from structurally invalid operations.
///
/// Readonly misuse, self-recursive effects and writes to untracked targets
/// are not errors: they are reported on the `tracing` warning channel (or
/// not at all) and treated as successful no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("{operation} is not supported on a {kind}")]
    KindMismatch {
        operation: &'static str,
        kind: ObjectKind,
    },

    #[error("invalid array key: {key:?}")]
    InvalidArrayKey { key: String },

    #[error("invalid array length: {value}")]
    InvalidLength { value: String },

    #[error("cannot add property {key:?}: object is not extensible")]
    NotExtensible { key: String },
}

impl ReactiveError {
    #[must_use]
    pub(crate) fn kind_mismatch(operation: &'static str, kind: ObjectKind) -> Self {
        Self::KindMismatch { operation, kind }
    }
}
