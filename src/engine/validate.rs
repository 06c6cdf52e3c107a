use crate::identity::Caller;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_resource(resource: &ResourceKey) -> Result<(), EngineError> {
    if resource.id.trim().is_empty() {
        return Err(EngineError::InvalidInput("resource id is empty"));
    }
    if resource.id.len() > MAX_RESOURCE_ID_LEN {
        return Err(EngineError::InvalidInput("resource id too long"));
    }
    Ok(())
}

pub(crate) fn validate_caller(caller: &Caller) -> Result<(), EngineError> {
    if caller.customer_ref.trim().is_empty() {
        return Err(EngineError::InvalidInput("customer reference is empty"));
    }
    if caller.customer_ref.len() > MAX_CUSTOMER_REF_LEN {
        return Err(EngineError::InvalidInput("customer reference too long"));
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: Option<&str>) -> Result<(), EngineError> {
    if let Some(r) = reason
        && r.len() > MAX_REASON_LEN {
            return Err(EngineError::InvalidInput("cancel reason too long"));
        }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("window start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidInput("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::InvalidInput("span too wide"));
    }
    Ok(())
}

/// Shape, bounds, and timing of a requested window for a resource type.
pub(crate) fn validate_window(kind: ResourceType, window: &Window, now: Ms) -> Result<(), EngineError> {
    match (kind.is_time_based(), window) {
        (true, Window::Time(span)) => {
            validate_span(span)?;
            if span.start < now {
                return Err(EngineError::InvalidInput("window starts in the past"));
            }
            Ok(())
        }
        (false, Window::Quantity(q)) => {
            if *q == 0 {
                return Err(EngineError::InvalidInput("quantity must be positive"));
            }
            Ok(())
        }
        (true, Window::Quantity(_)) => Err(EngineError::InvalidInput(
            "guides and homestays are booked by time window",
        )),
        (false, Window::Time(_)) => Err(EngineError::InvalidInput("products are booked by quantity")),
    }
}
