use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Validate a requested `[start, end)` window. Returns the `Span` so the
/// caller never constructs one from an unchecked pair.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(span)
}

/// The admission overlap test. Caller holds the resource write lock, so the
/// scan and the subsequent insert form one atomic admission decision.
/// Cancelled reservations are skipped — they no longer occupy the resource.
pub(crate) fn check_no_overlap(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    for existing in rs.overlapping(span) {
        match existing.status {
            ReservationStatus::Cancelled => continue,
            ReservationStatus::Active => return Err(EngineError::Conflict(existing.id)),
        }
    }
    Ok(())
}
