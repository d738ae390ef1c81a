use ulid::Ulid;

use crate::catalog::LookupFailure;
use crate::model::Span;

/// Why a resource could not take a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Catalog reports the resource as inactive.
    Inactive,
    /// Catalog could not be consulted; treated the same as inactive.
    Lookup(LookupFailure),
    /// Requested span hits a declared unavailability window.
    Window(Span),
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::Inactive => write!(f, "resource is not active"),
            UnavailableReason::Lookup(cause) => write!(f, "resource lookup failed: {cause}"),
            UnavailableReason::Window(w) => {
                write!(f, "resource is unavailable during [{}, {})", w.start, w.end)
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(Ulid),
    Unavailable(UnavailableReason),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    TransientDependency(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::TransientDependency(_) => "transient_dependency",
        }
    }

    /// SQLSTATE reported on the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::Conflict(_) => "23P01",
            EngineError::Unavailable(_) => "55000",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::TransientDependency(_) => "58000",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid reservation: {msg}"),
            EngineError::Conflict(id) => write!(
                f,
                "resource already booked for this time (conflicts with reservation {id})"
            ),
            EngineError::Unavailable(reason) => write!(f, "resource unavailable: {reason}"),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "reservation already exists: {id}"),
            EngineError::TransientDependency(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
