use crate::specialize::Kind;
use thiserror::Error;

/// Why a box shape cannot be flattened into native storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShapeIssue {
    #[error("record-shaped boxes have no flat layout")]
    Record,
    #[error("arrays of arrays of boxes cannot be addressed")]
    NestedArray,
}

#[derive(Debug, Error)]
pub enum UnboxError {
    #[error("unsupported shape for {entity} of kind {kind}: {issue}")]
    UnsupportedShape {
        entity: String,
        kind: Kind,
        issue: ShapeIssue,
    },
    #[error("no kind binding for {0}")]
    MissingBinding(String),
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

pub type Result<T> = std::result::Result<T, UnboxError>;
