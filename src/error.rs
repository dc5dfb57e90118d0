//! Error taxonomy shared by all components.
//!
//! Each component has its own closed error enum. Every one of them maps onto
//! [`ErrorKind`], which is what the service turns into a status code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure kinds visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Entity absent or soft-deleted.
    NotFound,
    /// Access-policy denial or missing admin privilege.
    Forbidden,
    /// Malformed or missing input.
    BadRequest,
    /// Uniqueness conflict.
    Conflict,
    /// Operation not allowed on this entity (e.g. assigning a community topic).
    InvalidOperation,
    /// Collaborator kept rate-limiting after all retries.
    RateLimited,
    /// Missing credentials or endpoint configuration.
    ConfigurationError,
    /// Generation succeeded but produced too little structured output.
    InsufficientContent,
    /// Collaborator unreachable, timed out or returned garbage.
    UpstreamUnavailable,
    /// Storage or other internal failure.
    Internal,
}

impl ErrorKind {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest => "BAD_REQUEST",
            Self::Conflict => "CONFLICT",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::RateLimited => "RATE_LIMITED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InsufficientContent => "INSUFFICIENT_CONTENT",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Implemented by every component error.
pub trait Classify {
    /// Failure kind of this error.
    fn kind(&self) -> ErrorKind;
}
