//! Identifier errors.

use thiserror::Error;

/// Failure to build an [`EntityId`](crate::EntityId) from raw input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The raw identifier was empty or whitespace only.
    #[error("entity id must not be blank")]
    Blank,
}
