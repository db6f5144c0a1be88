use thiserror::Error;

use super::types::ProfileId;

/// Failures surfaced by registry mutations.
///
/// Every failing operation leaves the registry and the disk unchanged, except
/// where an operation documents otherwise.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("profile {0} is not registered")]
    NotFound(ProfileId),
    /// Invariant violation: the selected profile has no registry entry. This
    /// can only be reached through a bug, never through user input.
    #[error("current profile {0} is missing from the registry")]
    CurrentMissing(ProfileId),
    #[error("{0}")]
    Filesystem(String),
}
