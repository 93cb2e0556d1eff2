use std::collections::HashSet;

use crate::model::*;
use crate::observability::{overlap_label, OVERLAPS_TOTAL};

use super::EngineError;

/// How a candidate overlaps one existing block. Exactly one case applies to
/// any overlapping pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Candidate covers the whole block: delete it.
    FullCover,
    /// Candidate sits strictly inside: keep the head, split off a tail.
    StrictContainment,
    /// Candidate covers the block's end: shorten it.
    TrimTail,
    /// Candidate covers the block's start: move its start to the candidate's end.
    TrimHead,
}

impl Overlap {
    /// `Ok(None)` when the spans don't overlap (adjacent spans included).
    pub fn classify(candidate: &WeekSpan, existing: &WeekSpan) -> Result<Option<Self>, EngineError> {
        if !candidate.overlaps(existing) {
            return Ok(None);
        }
        let (n, e) = (candidate, existing);
        let case = if n.contains_span(e) {
            Overlap::FullCover
        } else if n.start > e.start && n.end < e.end {
            Overlap::StrictContainment
        } else if n.start > e.start && n.start < e.end && n.end >= e.end {
            Overlap::TrimTail
        } else if n.end > e.start && n.end < e.end && n.start <= e.start {
            Overlap::TrimHead
        } else {
            return Err(EngineError::ConflictPlan(format!(
                "overlap of {n} and {e} matched no case"
            )));
        };
        Ok(Some(case))
    }
}

/// Structural changes restoring the no-overlap invariant around a candidate.
/// The candidate itself is not part of the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    pub deletes: Vec<BlockId>,
    pub updates: Vec<BlockPatch>,
    pub creates: Vec<NewBlock>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.creates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deletes.len() + self.updates.len() + self.creates.len()
    }

    /// Shorten `block` to `weeks`, or delete it if nothing would remain.
    fn shorten(&mut self, block: &Block, start: Option<WeekPoint>, weeks: i64) {
        match u32::try_from(weeks) {
            Ok(duration) if duration > 0 => self.updates.push(BlockPatch {
                id: block.id,
                start,
                duration,
                payload: None,
            }),
            _ => self.deletes.push(block.id),
        }
    }
}

/// Compute the plan for inserting `candidate` into `existing`.
///
/// Pure and deterministic: operations come out in the order of `existing`.
/// `exclude` names the block being edited, which is never compared against
/// its own replacement. Blocks of other subjects are ignored.
pub fn resolve(
    existing: &[Block],
    candidate: &BlockDraft,
    exclude: Option<BlockId>,
) -> Result<MutationPlan, EngineError> {
    if candidate.duration == 0 {
        return Err(EngineError::Validation("duration must be at least one week"));
    }
    let n = candidate.span();
    let mut plan = MutationPlan::default();

    for block in comparable(existing, candidate, exclude) {
        let e = block.span();
        let Some(case) = Overlap::classify(&n, &e)? else {
            continue;
        };
        metrics::counter!(OVERLAPS_TOTAL, "case" => overlap_label(case)).increment(1);

        match case {
            Overlap::FullCover => plan.deletes.push(block.id),
            Overlap::StrictContainment => {
                plan.shorten(block, None, e.start.weeks_until(n.start));
                let tail = n.end.weeks_until(e.end);
                if let Ok(duration) = u32::try_from(tail)
                    && duration > 0
                {
                    plan.creates.push(NewBlock {
                        subject_id: block.subject_id,
                        start: n.end,
                        duration,
                        payload: block.payload.clone(),
                    });
                }
            }
            Overlap::TrimTail => plan.shorten(block, None, e.start.weeks_until(n.start)),
            Overlap::TrimHead => plan.shorten(block, Some(n.end), n.end.weeks_until(e.end)),
        }
    }

    verify(existing, candidate, exclude, &plan)?;
    Ok(plan)
}

fn comparable<'a>(
    existing: &'a [Block],
    candidate: &'a BlockDraft,
    exclude: Option<BlockId>,
) -> impl Iterator<Item = &'a Block> {
    existing
        .iter()
        .filter(move |b| b.subject_id == candidate.subject_id && Some(b.id) != exclude)
}

/// Simulate the plan and check that the candidate and every block the plan
/// touched overlap nothing else afterwards.
fn verify(
    existing: &[Block],
    candidate: &BlockDraft,
    exclude: Option<BlockId>,
    plan: &MutationPlan,
) -> Result<(), EngineError> {
    let deleted: HashSet<BlockId> = plan.deletes.iter().copied().collect();
    let mut touched = vec![candidate.span()];
    let mut untouched = Vec::new();

    for block in comparable(existing, candidate, exclude).filter(|b| !deleted.contains(&b.id)) {
        match plan.updates.iter().find(|p| p.id == block.id) {
            Some(patch) => touched.push(patch.applied_to(block).span()),
            None => untouched.push(block.span()),
        }
    }
    touched.extend(plan.creates.iter().map(NewBlock::span));

    for (i, a) in touched.iter().enumerate() {
        if let Some(b) = touched[i + 1..]
            .iter()
            .chain(untouched.iter())
            .find(|b| a.overlaps(b))
        {
            return Err(EngineError::ConflictPlan(format!(
                "{a} would still overlap {b}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn w(i: i64) -> WeekPoint {
        WeekPoint::from_index(i)
    }

    fn span(start: i64, end: i64) -> WeekSpan {
        WeekSpan::new(w(start), w(end))
    }

    fn block(subject_id: SubjectId, start: i64, duration: u32) -> Block {
        Block {
            id: Ulid::new(),
            subject_id,
            start: w(start),
            duration,
            payload: Payload::new("general prep", ["aerobic"]),
        }
    }

    fn draft(subject_id: SubjectId, start: i64, duration: u32) -> BlockDraft {
        BlockDraft {
            id: None,
            subject_id,
            start: w(start),
            duration,
            payload: Payload::new("competition", ["speed"]),
        }
    }

    // ── Classification ───────────────────────────────────────

    #[test]
    fn classify_each_case() {
        let e = span(10, 20);
        assert_eq!(Overlap::classify(&span(8, 22), &e).unwrap(), Some(Overlap::FullCover));
        assert_eq!(Overlap::classify(&span(10, 20), &e).unwrap(), Some(Overlap::FullCover));
        assert_eq!(Overlap::classify(&span(12, 15), &e).unwrap(), Some(Overlap::StrictContainment));
        assert_eq!(Overlap::classify(&span(12, 20), &e).unwrap(), Some(Overlap::TrimTail));
        assert_eq!(Overlap::classify(&span(12, 25), &e).unwrap(), Some(Overlap::TrimTail));
        assert_eq!(Overlap::classify(&span(10, 15), &e).unwrap(), Some(Overlap::TrimHead));
        assert_eq!(Overlap::classify(&span(5, 15), &e).unwrap(), Some(Overlap::TrimHead));
    }

    #[test]
    fn classify_adjacent_is_no_overlap() {
        let e = span(10, 20);
        assert_eq!(Overlap::classify(&span(20, 24), &e).unwrap(), None);
        assert_eq!(Overlap::classify(&span(6, 10), &e).unwrap(), None);
        assert_eq!(Overlap::classify(&span(30, 31), &e).unwrap(), None);
    }

    #[test]
    fn classify_is_exhaustive_for_small_grid() {
        for es in 0..6 {
            for ee in es + 1..7 {
                for ns in 0..6 {
                    for ne in ns + 1..7 {
                        let (n, e) = (span(ns, ne), span(es, ee));
                        let case = Overlap::classify(&n, &e).unwrap();
                        assert_eq!(case.is_some(), n.overlaps(&e), "{n} vs {e}");
                    }
                }
            }
        }
    }

    // ── Scenarios ────────────────────────────────────────────

    #[test]
    fn full_cover_deletes() {
        let s = Ulid::new();
        let a = block(s, 10, 2);
        let plan = resolve(std::slice::from_ref(&a), &draft(s, 8, 10), None).unwrap();
        assert_eq!(plan.deletes, vec![a.id]);
        assert!(plan.updates.is_empty());
        assert!(plan.creates.is_empty());
    }

    #[test]
    fn strict_containment_splits() {
        let s = Ulid::new();
        let a = block(s, 10, 10);
        let plan = resolve(std::slice::from_ref(&a), &draft(s, 12, 3), None).unwrap();
        assert!(plan.deletes.is_empty());
        assert_eq!(
            plan.updates,
            vec![BlockPatch {
                id: a.id,
                start: None,
                duration: 2,
                payload: None
            }]
        );
        assert_eq!(
            plan.creates,
            vec![NewBlock {
                subject_id: s,
                start: w(15),
                duration: 5,
                payload: a.payload.clone(),
            }]
        );
    }

    #[test]
    fn trim_tail_shortens() {
        let s = Ulid::new();
        let a = block(s, 10, 4);
        let plan = resolve(std::slice::from_ref(&a), &draft(s, 12, 4), None).unwrap();
        assert_eq!(
            plan.updates,
            vec![BlockPatch {
                id: a.id,
                start: None,
                duration: 2,
                payload: None
            }]
        );
        assert!(plan.deletes.is_empty() && plan.creates.is_empty());
    }

    #[test]
    fn trim_head_moves_start() {
        let s = Ulid::new();
        let a = block(s, 10, 5);
        let plan = resolve(std::slice::from_ref(&a), &draft(s, 5, 7), None).unwrap();
        assert_eq!(
            plan.updates,
            vec![BlockPatch {
                id: a.id,
                start: Some(w(12)),
                duration: 3,
                payload: None
            }]
        );
        assert!(plan.deletes.is_empty() && plan.creates.is_empty());
    }

    #[test]
    fn exact_overlap_is_full_cover() {
        let s = Ulid::new();
        let a = block(s, 10, 1);
        let plan = resolve(std::slice::from_ref(&a), &draft(s, 10, 1), None).unwrap();
        assert_eq!(plan.deletes, vec![a.id]);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn adjacent_blocks_untouched() {
        let s = Ulid::new();
        let before = block(s, 0, 4);
        let after = block(s, 8, 4);
        let plan = resolve(&[before, after], &draft(s, 4, 4), None).unwrap();
        assert!(plan.is_empty());
    }

    // ── Multi-block and edit handling ────────────────────────

    #[test]
    fn candidate_spanning_several_blocks() {
        let s = Ulid::new();
        let head = block(s, 0, 6);
        let covered = block(s, 6, 2);
        let tail = block(s, 8, 6);
        let far = block(s, 30, 4);
        let existing = vec![head.clone(), covered.clone(), tail.clone(), far];
        let plan = resolve(&existing, &draft(s, 4, 6), None).unwrap();

        assert_eq!(plan.deletes, vec![covered.id]);
        assert_eq!(
            plan.updates,
            vec![
                BlockPatch {
                    id: head.id,
                    start: None,
                    duration: 4,
                    payload: None
                },
                BlockPatch {
                    id: tail.id,
                    start: Some(w(10)),
                    duration: 4,
                    payload: None
                },
            ]
        );
        assert!(plan.creates.is_empty());
    }

    #[test]
    fn edited_block_is_excluded() {
        let s = Ulid::new();
        let edited = block(s, 10, 4);
        let neighbour = block(s, 14, 4);
        let mut candidate = draft(s, 11, 4);
        candidate.id = Some(edited.id);

        let plan = resolve(&[edited.clone(), neighbour.clone()], &candidate, Some(edited.id)).unwrap();
        assert!(!plan.deletes.contains(&edited.id));
        assert!(plan.updates.iter().all(|p| p.id != edited.id));
        assert_eq!(
            plan.updates,
            vec![BlockPatch {
                id: neighbour.id,
                start: Some(w(15)),
                duration: 3,
                payload: None
            }]
        );
    }

    #[test]
    fn other_subjects_ignored() {
        let s = Ulid::new();
        let foreign = block(Ulid::new(), 10, 4);
        let plan = resolve(&[foreign], &draft(s, 10, 4), None).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn resolve_is_deterministic() {
        let s = Ulid::new();
        let existing = vec![block(s, 0, 5), block(s, 5, 10), block(s, 20, 3)];
        let candidate = draft(s, 3, 19);
        let first = resolve(&existing, &candidate, None).unwrap();
        let second = resolve(&existing, &candidate, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn overlapping_input_is_a_plan_error() {
        // A and B already overlap: splitting A leaves a tail on top of B.
        let s = Ulid::new();
        let a = block(s, 0, 10);
        let b = block(s, 5, 10);
        let result = resolve(&[a, b], &draft(s, 2, 2), None);
        assert!(matches!(result, Err(EngineError::ConflictPlan(_))));
    }

    #[test]
    fn overlapping_input_away_from_candidate_is_tolerated() {
        let s = Ulid::new();
        let a = block(s, 0, 10);
        let b = block(s, 5, 10);
        let plan = resolve(&[a, b], &draft(s, 40, 2), None).unwrap();
        assert!(plan.is_empty());
    }
}
