use serde::Serialize;

use crate::model::*;

use super::EngineError;

/// Display metadata for a proposed block. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    /// 1-based position among the subject's blocks ordered by start.
    pub block_number: usize,
    pub first_week_number: u32,
    pub last_week_number: u32,
    pub start: WeekPoint,
    /// Exclusive.
    pub end: WeekPoint,
}

/// Where `candidate` would fall among `existing`, and its ISO week labels.
///
/// Ties put the candidate after existing blocks with the same start. When the
/// candidate edits a block, that block does not count against itself.
pub fn describe(existing: &[Block], candidate: &BlockDraft) -> Result<Preview, EngineError> {
    if candidate.duration == 0 {
        return Err(EngineError::Validation("duration must be at least one week"));
    }
    let before = existing
        .iter()
        .filter(|b| b.subject_id == candidate.subject_id && Some(b.id) != candidate.id)
        .filter(|b| b.start <= candidate.start)
        .count();

    let last = candidate.start.add_weeks(i64::from(candidate.duration) - 1);
    let (Some(first_week_number), Some(last_week_number)) =
        (candidate.start.week_number(), last.week_number())
    else {
        return Err(EngineError::Validation("block lies outside the calendar range"));
    };

    Ok(Preview {
        block_number: before + 1,
        first_week_number,
        last_week_number,
        start: candidate.start,
        end: candidate.end(),
    })
}
