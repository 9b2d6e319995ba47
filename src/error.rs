//! Error taxonomy for the bridge
//!
//! Validation failures (layout, arity, kind) are always returned to the caller.
//! Lifetime-discipline violations are routed through [`lifetime_violation`],
//! which is loud in strict mode and contained otherwise.

use crate::anchor::ModuleId;
use crate::logging::log_lifetime_violation;
use crate::value::ValueKind;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: ValueKind, found: ValueKind },

    #[error("unsupported value kind tag {tag}")]
    UnsupportedKind { tag: u8 },

    #[error("unknown class {0}")]
    UnknownClass(String),

    #[error("class {class} has no method '{method}' accepting {args:?}")]
    UnknownMethod {
        class: String,
        method: String,
        args: Vec<ValueKind>,
    },

    #[error("class {class} has no property '{property}'")]
    UnknownProperty { class: String, property: String },

    #[error("layout mismatch in {type_name}: {detail}")]
    LayoutMismatch { type_name: String, detail: String },

    #[error("class identity conflict for {name}: {detail}")]
    ClassIdentityConflict { name: String, detail: String },

    #[error("arity mismatch calling {method}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("native invocation of {method} failed")]
    InvocationFailed { method: String },

    #[error("double release of instance {addr:#x}")]
    DoubleRelease { addr: usize },

    #[error("invalid handle {addr:#x}: {reason}")]
    InvalidHandle { addr: usize, reason: &'static str },

    #[error("class {class} cannot be constructed through the bridge: {reason}")]
    NotConstructible { class: String, reason: &'static str },

    #[error("class {class} is single-owner; shared and weak handles are not supported")]
    SharingNotSupported { class: String },

    #[error("module {module} is not accepting invocations")]
    ModuleUnavailable { module: ModuleId },

    #[error("module '{name}' failed to load: {reason}")]
    ModuleLoadFailed { name: String, reason: String },

    #[error("timed out draining {in_flight} in-flight invocations of module {module}")]
    DrainTimeout { module: ModuleId, in_flight: usize },

    #[error("manifest error in {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("library error: {0}")]
    Library(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Lifetime-discipline violations: programmer errors, not recoverable by scripts
    pub fn is_lifetime_violation(&self) -> bool {
        matches!(self, Self::DoubleRelease { .. } | Self::InvalidHandle { .. })
    }

    /// Validation failures that are surfaced as-is and never coerced
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::KindMismatch { .. }
                | Self::UnsupportedKind { .. }
                | Self::LayoutMismatch { .. }
                | Self::ArityMismatch { .. }
        )
    }
}

/// Apply the lifetime-violation policy.
///
/// Strict: panic with the error message. Otherwise the violation is logged
/// and handed back so the caller can return it without touching any state.
#[track_caller]
pub fn lifetime_violation(strict: bool, err: BridgeError) -> BridgeError {
    log_lifetime_violation(&err.to_string(), strict);
    if strict {
        panic!("lifetime violation: {err}");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BridgeError::DoubleRelease { addr: 0x10 }.is_lifetime_violation());
        assert!(BridgeError::InvalidHandle { addr: 0, reason: "dead" }.is_lifetime_violation());
        assert!(!BridgeError::Library("x".into()).is_lifetime_violation());

        let arity = BridgeError::ArityMismatch { method: "f".into(), expected: 2, got: 1 };
        assert!(arity.is_validation());
        assert_eq!(
            arity.to_string(),
            "arity mismatch calling f: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn test_contained_violation_returns_error() {
        let err = lifetime_violation(false, BridgeError::DoubleRelease { addr: 0x40 });
        assert!(matches!(err, BridgeError::DoubleRelease { addr: 0x40 }));
    }

    #[test]
    #[should_panic(expected = "lifetime violation")]
    fn test_strict_violation_panics() {
        let _ = lifetime_violation(true, BridgeError::DoubleRelease { addr: 0x40 });
    }
}
