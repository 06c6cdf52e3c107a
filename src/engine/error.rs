use ulid::Ulid;

use crate::model::{BookingStatus, ResourceKey};

#[derive(Debug)]
pub enum EngineError {
    InvalidInput(&'static str),
    /// Unknown, inactive, or zero-capacity catalog resource.
    ResourceNotFound(ResourceKey),
    /// Unknown booking id.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    SlotUnavailable {
        resource: ResourceKey,
        capacity: u32,
    },
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    Forbidden(&'static str),
    StorageFailure(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::SlotUnavailable { .. } => "slot_unavailable",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Server-side condition; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageFailure(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::ResourceNotFound(key) => write!(f, "resource not found: {key}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "booking already exists: {id}"),
            EngineError::SlotUnavailable { resource, capacity } => {
                write!(f, "slot unavailable on {resource}: capacity {capacity} reached")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
