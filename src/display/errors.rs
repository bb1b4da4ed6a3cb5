//! Adapter error types

use thiserror::Error;

use super::types::OwnerToken;

/// Errors returned by the adapter façade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no virtual display registered for {0}")]
    UnknownOwner(OwnerToken),

    #[error("owner {0} died before its virtual display could be linked")]
    OwnerAlreadyDead(OwnerToken),

    #[error("capture session for {0} is no longer active")]
    CaptureSessionUnavailable(OwnerToken),

    #[error("{0} already owns a virtual display")]
    DuplicateOwner(OwnerToken),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Compositor(#[from] CompositorError),
}

impl AdapterError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Failures of the compositor primitive that backs native display handles
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositorError {
    #[error("failed to allocate native display '{0}'")]
    AllocationFailed(String),
}

/// Failures talking to another process
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote endpoint is gone")]
    DeadObject,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
