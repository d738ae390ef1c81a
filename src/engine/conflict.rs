use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Range and width checks shared by the store and the orchestrator.
pub fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::invalid("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::invalid("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::invalid("reservation too long"));
    }
    Ok(())
}

/// Fails with the id of the first non-cancelled reservation overlapping `span`.
pub(crate) fn check_no_conflict(book: &ResourceBook, span: &Span) -> Result<(), EngineError> {
    match book.first_blocking(span) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
