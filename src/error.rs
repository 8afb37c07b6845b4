//! Errors that can cross the public surface.
//!
//! Only [`crate::Allocator::init`] propagates a typed error; every other
//! public operation reports failure locally (a null pointer, `false`, or
//! a zeroed [`crate::Stats`] snapshot).

use thiserror::Error;

/// Failure modes for [`crate::Allocator::init`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    /// `init` was called on an allocator that is already initialized.
    #[error("allocator is already initialized")]
    AlreadyInitialized,
    /// The configured page size is zero... is resolved to the platform
    /// default before this check, so this only fires for a non-power-of-two
    /// override.
    #[error("configured page size must be a power of two, got {0}")]
    InvalidPageSize(usize),
    /// The initial OS mapping failed.
    #[error("failed to map {requested} bytes from the OS")]
    MapFailed { requested: usize },
}
