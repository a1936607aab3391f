//! # Update Errors
//!
//! Every fallible operation returns `eyre::Result`. Failures that callers need
//! to tell apart are raised as [`UpdateError`] values and travel inside the
//! `eyre::Report`; classify them with `report.downcast_ref::<UpdateError>()`.
//!
//! ## Taxonomy
//!
//! | Variant        | Raised by                    | List state afterwards |
//! |----------------|------------------------------|-----------------------|
//! | `Conflict`     | merge, path scheduling       | Failed                |
//! | `Validation`   | prepare                      | Failed                |
//! | `NotFound`     | prepare / database-level apply | Failed              |
//! | `Io`           | blob store, put, flush       | Failed                |
//! | `Cancelled`    | staged clip construction     | Failed                |
//! | `InvalidState` | calls in the wrong state     | unchanged             |
//! | `Internal`     | atomic update cache checks   | Failed                |
//!
//! All conflict and validation errors surface before the first atomic update
//! is issued. Errors raised after node-level application has begun leave the
//! store as it is; the caller's transaction boundary has to discard it.

use std::path::PathBuf;

use crate::update::UpdateKind;

#[derive(Debug)]
pub enum UpdateError {
    /// Two primitives of a single-valued kind target the same node or path.
    Conflict { kind: UpdateKind, target: String },
    /// A payload or target violates a data model invariant.
    Validation { kind: UpdateKind, message: String },
    /// A target position, identifier or path no longer resolves.
    NotFound { kind: UpdateKind, target: String },
    /// A file system operation failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The cooperative cancellation flag was raised during prepare.
    Cancelled,
    /// The pending list does not accept the operation in its current state.
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// The ordered atomic update list is inconsistent.
    Internal(String),
}

impl UpdateError {
    pub fn conflict(kind: UpdateKind, target: impl std::fmt::Display) -> Self {
        Self::Conflict {
            kind,
            target: target.to_string(),
        }
    }

    pub fn validation(kind: UpdateKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(kind: UpdateKind, target: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            target: target.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict { kind, target } => {
                write!(f, "multiple {} operations on the same target: {}", kind, target)
            }
            Self::Validation { kind, message } => write!(f, "invalid {}: {}", kind, message),
            Self::NotFound { kind, target } => write!(f, "{} target not found: {}", kind, target),
            Self::Io { path, source } => write!(f, "i/o error on {}: {}", path.display(), source),
            Self::Cancelled => write!(f, "update cancelled"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {} a pending update list that is {}", operation, state)
            }
            Self::Internal(message) => write!(f, "inconsistent atomic updates: {}", message),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
