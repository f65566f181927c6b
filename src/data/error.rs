//! Error taxonomy for upstream fetches

use thiserror::Error;

/// HTTP statuses that mean the request or response exceeded a size limit.
/// Retrying cannot succeed, so the resource is treated as permanently unavailable.
pub const PAYLOAD_TOO_LARGE: u16 = 413;
pub const HEADERS_TOO_LARGE: u16 = 431;

/// Errors that can occur when fetching upstream data
///
/// Cloneable so a single in-flight result can be handed to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource can never be fetched (size limits, malformed payload)
    #[error("{resource} is permanently unavailable: {reason}")]
    Permanent { resource: String, reason: String },

    /// Upstream answered with a non-success status
    #[error("upstream returned HTTP {status} for {resource}")]
    Status { resource: String, status: u16 },

    /// The request never got an answer
    #[error("request for {resource} failed: {message}")]
    Network { resource: String, message: String },

    /// A success response whose payload could not be mapped
    #[error("malformed payload for {resource}: {message}")]
    Malformed { resource: String, message: String },

    /// The coalesced request this call was waiting on went away
    #[error("request for {resource} was abandoned")]
    Abandoned { resource: String },
}

impl FetchError {
    /// Permanent failures are never retried automatically
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Transient failures are retried on the next refresh cycle
    pub fn is_transient(&self) -> bool {
        !self.is_permanent()
    }

    pub fn resource(&self) -> &str {
        match self {
            Self::Permanent { resource, .. }
            | Self::Status { resource, .. }
            | Self::Network { resource, .. }
            | Self::Malformed { resource, .. }
            | Self::Abandoned { resource } => resource,
        }
    }

    pub(crate) fn network(resource: &str, error: impl std::fmt::Display) -> Self {
        Self::Network {
            resource: resource.to_string(),
            message: error.to_string(),
        }
    }

    pub(crate) fn malformed(resource: &str, error: impl std::fmt::Display) -> Self {
        Self::Malformed {
            resource: resource.to_string(),
            message: error.to_string(),
        }
    }
}

/// How a response status should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Size limit exceeded; terminal for the resource
    TooLarge,
    /// Any other failure; worth retrying later
    Failure,
}

/// Classifies an HTTP status code
///
/// Only 413 and 431 are terminal. A 404 is deliberately left transient: a code
/// missing today may be added upstream later.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        PAYLOAD_TOO_LARGE | HEADERS_TOO_LARGE => StatusClass::TooLarge,
        _ => StatusClass::Failure,
    }
}
