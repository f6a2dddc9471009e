// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the reflection core.
//!
//! Mutation errors are returned per operation and never roll back sibling
//! operations in the same batch. Traversal errors abort the traversal that
//! produced them.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    /// Missing path, child, or session
    #[error("Not found: {0}")]
    NotFound(String),
    /// Quota exceeded, or the operation is disallowed by its flags
    #[error("Access denied: {0}")]
    AccessDenied(String),
    /// Pool or node allocation failure
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    /// Malformed pattern or argument
    #[error("Bad argument: {0}")]
    BadArgument(String),
    /// Malformed node path
    #[error("Bad object: {0}")]
    BadObject(String),
    /// Internal invariant violated
    #[error("Logic error: {0}")]
    LogicError(String),
}

impl ReflectError {
    /// Stable short code, used as a metric label and in bounced replies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AccessDenied(_) => "access_denied",
            Self::OutOfMemory(_) => "out_of_memory",
            Self::BadArgument(_) => "bad_argument",
            Self::BadObject(_) => "bad_object",
            Self::LogicError(_) => "logic_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReflectError>;
