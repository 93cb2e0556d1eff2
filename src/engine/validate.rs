use crate::limits::*;
use crate::model::*;

use super::{EngineError, ProposeRequest};

/// Check a proposal and turn it into a week-aligned draft. Nothing here
/// touches the store.
pub(crate) fn validate_request(req: ProposeRequest) -> Result<BlockDraft, EngineError> {
    if req.duration == 0 {
        return Err(EngineError::Validation("duration must be at least one week"));
    }
    if req.duration > MAX_DURATION_WEEKS {
        return Err(EngineError::Validation("duration too long"));
    }
    validate_payload(&req.payload)?;

    let start = WeekPoint::from_date(req.start);
    if start.to_date().is_none() {
        return Err(EngineError::Validation("block starts outside the calendar range"));
    }
    if start.add_weeks(i64::from(req.duration)).to_date().is_none() {
        return Err(EngineError::Validation("block ends outside the calendar range"));
    }

    Ok(BlockDraft {
        id: req.editing_id,
        subject_id: req.subject_id,
        start,
        duration: req.duration,
        payload: req.payload,
    })
}

fn validate_payload(payload: &Payload) -> Result<(), EngineError> {
    if payload.name.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation("name too long"));
    }
    if payload.tags.is_empty() {
        return Err(EngineError::Validation("at least one tag is required"));
    }
    if payload.tags.len() > MAX_TAGS {
        return Err(EngineError::Validation("too many tags"));
    }
    for tag in &payload.tags {
        if tag.trim().is_empty() {
            return Err(EngineError::Validation("empty tag"));
        }
        if tag.len() > MAX_TAG_LEN {
            return Err(EngineError::Validation("tag too long"));
        }
    }
    Ok(())
}
