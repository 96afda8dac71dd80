//! Error taxonomy, split along the build-time / invocation-time boundary.
//!
//! Everything in `DeriveError` is raised synchronously while artifacts are
//! being composed; a failed derivation never hands back a partially working
//! artifact. `CodecError` covers failures observed while *invoking* a
//! finished artifact (malformed input, ragged data, truncated bytes).
//! Derivation is deterministic, so nothing here is retried.

use thiserror::Error;

use crate::shape::ShapeId;

/// Build-time failures (artifact composition).
#[derive(Debug, Error)]
pub enum DeriveError {
    /// A shape kind with no composition rule. The kind set is closed, so
    /// outside of `Opaque` this should be unreachable.
    #[error("shape `{shape}` of kind `{kind}` has no composition rule")]
    UnsupportedShapeKind { shape: String, kind: &'static str },

    /// Container shape declares `Strategy::None`: collection-like type with
    /// no discoverable construction path.
    #[error("shape `{shape}` declares no usable construction strategy")]
    UnsupportedConstructionStrategy { shape: String },

    /// Object shape with neither a usable constructor nor settable members.
    #[error("shape `{shape}` has neither a usable constructor nor settable members")]
    NoUsableConstructor { shape: String },

    /// Dangling `ShapeId`; the registry is expected to be identity-stable.
    #[error("unknown shape id {0}")]
    UnknownShape(ShapeId),
}

/// Invocation-time failures, surfaced by the application layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing required field `{0}`")]
    MissingField(String),

    /// Sibling sub-sequences disagreed on length during multi-dimensional
    /// assembly.
    #[error("ragged multi-dimensional data at depth {depth}: expected {expected} elements, found {found}")]
    Ragged {
        depth: usize,
        expected: usize,
        found: usize,
    },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("unknown enum case `{0}`")]
    UnknownEnumCase(String),

    #[error("invalid value: {0}")]
    Invalid(String),
}
