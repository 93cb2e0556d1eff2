use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::timeline::WeekPoint;

pub type BlockId = Ulid;
pub type SubjectId = Ulid;

/// Half-open interval `[start, end)` on the week timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSpan {
    pub start: WeekPoint,
    pub end: WeekPoint,
}

impl WeekSpan {
    pub fn new(start: WeekPoint, end: WeekPoint) -> Self {
        debug_assert!(start < end, "WeekSpan start must be before end");
        Self { start, end }
    }

    pub fn from_start(start: WeekPoint, weeks: u32) -> Self {
        Self::new(start, start.add_weeks(i64::from(weeks)))
    }

    pub fn weeks(&self) -> i64 {
        self.start.weeks_until(self.end)
    }

    /// Adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &WeekSpan) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &WeekSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for WeekSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// What a block is about. Opaque to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub name: String,
    pub tags: Vec<String>,
}

impl Payload {
    pub fn new(name: impl Into<String>, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// A persisted periodization block covering `[start, start + duration)` weeks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub subject_id: SubjectId,
    pub start: WeekPoint,
    /// Whole weeks, never zero once persisted.
    pub duration: u32,
    pub payload: Payload,
}

impl Block {
    pub fn end(&self) -> WeekPoint {
        self.start.add_weeks(i64::from(self.duration))
    }

    pub fn span(&self) -> WeekSpan {
        WeekSpan::from_start(self.start, self.duration)
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.span().overlaps(&other.span())
    }
}

/// A block being proposed: brand new when `id` is `None`, an edit of an
/// existing block otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDraft {
    pub id: Option<BlockId>,
    pub subject_id: SubjectId,
    pub start: WeekPoint,
    pub duration: u32,
    pub payload: Payload,
}

impl BlockDraft {
    pub fn end(&self) -> WeekPoint {
        self.start.add_weeks(i64::from(self.duration))
    }

    pub fn span(&self) -> WeekSpan {
        WeekSpan::from_start(self.start, self.duration)
    }
}

/// Store request for a block that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlock {
    pub subject_id: SubjectId,
    pub start: WeekPoint,
    pub duration: u32,
    pub payload: Payload,
}

impl NewBlock {
    pub fn span(&self) -> WeekSpan {
        WeekSpan::from_start(self.start, self.duration)
    }
}

/// Store request changing an existing block. `start` and `payload` are left
/// untouched when `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPatch {
    pub id: BlockId,
    pub start: Option<WeekPoint>,
    pub duration: u32,
    pub payload: Option<Payload>,
}

impl BlockPatch {
    /// The block as it looks after this patch lands.
    pub fn applied_to(&self, block: &Block) -> Block {
        Block {
            id: block.id,
            subject_id: block.subject_id,
            start: self.start.unwrap_or(block.start),
            duration: self.duration,
            payload: self.payload.clone().unwrap_or_else(|| block.payload.clone()),
        }
    }
}

/// All blocks of one subject, sorted by `start`.
#[derive(Debug, Clone)]
pub struct SubjectState {
    pub id: SubjectId,
    pub blocks: Vec<Block>,
}

impl SubjectState {
    pub fn new(id: SubjectId) -> Self {
        Self {
            id,
            blocks: Vec::new(),
        }
    }

    /// Insert block maintaining sort order by start.
    pub fn insert_block(&mut self, block: Block) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    /// Remove block by id.
    pub fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Return only blocks whose span overlaps the query window.
    /// Uses binary search to skip blocks starting at or after `query.end`.
    pub fn overlapping(&self, query: &WeekSpan) -> impl Iterator<Item = &Block> {
        let right_bound = self.blocks.partition_point(|b| b.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.end() > query.start)
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BlockCreated { block } => self.insert_block(block.clone()),
            Event::BlockUpdated { block } => {
                self.remove_block(block.id);
                self.insert_block(block.clone());
            }
            Event::BlockDeleted { id, .. } => {
                self.remove_block(*id);
            }
        }
    }
}

/// Block lifecycle events. Doubles as the WAL record format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BlockCreated { block: Block },
    /// Carries the full post-update block.
    BlockUpdated { block: Block },
    BlockDeleted { id: BlockId, subject_id: SubjectId },
}

impl Event {
    pub fn subject_id(&self) -> SubjectId {
        match self {
            Event::BlockCreated { block } | Event::BlockUpdated { block } => block.subject_id,
            Event::BlockDeleted { subject_id, .. } => *subject_id,
        }
    }

    pub fn block_id(&self) -> BlockId {
        match self {
            Event::BlockCreated { block } | Event::BlockUpdated { block } => block.id,
            Event::BlockDeleted { id, .. } => *id,
        }
    }
}
