use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{BlockStore, StoreError};

pub type SharedSubjectState = Arc<RwLock<SubjectState>>;

/// Per-subject block state behind async locks. Used directly in tests and as
/// the live view of the WAL-backed store.
pub struct InMemoryStore {
    subjects: DashMap<SubjectId, SharedSubjectState>,
    /// Reverse lookup: block id → subject id
    block_to_subject: DashMap<BlockId, SubjectId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
            block_to_subject: DashMap::new(),
        }
    }

    /// Rebuild state from an event sequence (WAL replay). No locking needed:
    /// states are assembled before being shared.
    pub fn from_events(events: &[Event]) -> Self {
        let store = Self::new();
        let mut states: HashMap<SubjectId, SubjectState> = HashMap::new();
        for event in events {
            let subject_id = event.subject_id();
            states
                .entry(subject_id)
                .or_insert_with(|| SubjectState::new(subject_id))
                .apply(event);
            store.index_event(event);
        }
        for (id, state) in states {
            store.subjects.insert(id, Arc::new(RwLock::new(state)));
        }
        store
    }

    // ── Subject lookup ───────────────────────────────────────

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn subject_ids(&self) -> Vec<SubjectId> {
        self.subjects.iter().map(|e| *e.key()).collect()
    }

    pub fn get_subject(&self, id: &SubjectId) -> Option<SharedSubjectState> {
        self.subjects.get(id).map(|e| e.value().clone())
    }

    fn get_or_create_subject(&self, id: SubjectId) -> SharedSubjectState {
        self.subjects
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(SubjectState::new(id))))
            .value()
            .clone()
    }

    pub fn get_subject_for_block(&self, block_id: &BlockId) -> Option<SubjectId> {
        self.block_to_subject.get(block_id).map(|e| *e.value())
    }

    // ── Write path ───────────────────────────────────────────

    pub(crate) async fn lock_subject(&self, id: SubjectId) -> OwnedRwLockWriteGuard<SubjectState> {
        self.get_or_create_subject(id).write_owned().await
    }

    /// Lookup block → subject, acquire the subject's write lock.
    pub(crate) async fn lock_block_subject(
        &self,
        block_id: BlockId,
    ) -> Result<OwnedRwLockWriteGuard<SubjectState>, StoreError> {
        let subject_id = self
            .get_subject_for_block(&block_id)
            .ok_or(StoreError::NotFound(block_id))?;
        let state = self
            .get_subject(&subject_id)
            .ok_or(StoreError::NotFound(block_id))?;
        Ok(state.write_owned().await)
    }

    /// Apply an event to a subject the caller already holds the lock for.
    pub fn apply_event(&self, state: &mut SubjectState, event: &Event) {
        state.apply(event);
        self.index_event(event);
    }

    fn index_event(&self, event: &Event) {
        match event {
            Event::BlockCreated { block } | Event::BlockUpdated { block } => {
                self.block_to_subject.insert(block.id, block.subject_id);
            }
            Event::BlockDeleted { id, .. } => {
                self.block_to_subject.remove(id);
            }
        }
    }

    /// Minimal event sequence recreating the current state.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for id in self.subject_ids() {
            let Some(state) = self.get_subject(&id) else { continue };
            let guard = state.read().await;
            events.extend(
                guard
                    .blocks
                    .iter()
                    .map(|b| Event::BlockCreated { block: b.clone() }),
            );
        }
        events
    }
}

// ── Mutation builders (caller holds the subject lock) ───────

pub(crate) fn build_created(state: &SubjectState, new: NewBlock) -> Result<Block, StoreError> {
    if new.duration == 0 {
        return Err(StoreError::Invalid("duration must be at least one week"));
    }
    if state.blocks.len() >= MAX_BLOCKS_PER_SUBJECT {
        return Err(StoreError::LimitExceeded("too many blocks for subject"));
    }
    Ok(Block {
        id: Ulid::new(),
        subject_id: new.subject_id,
        start: new.start,
        duration: new.duration,
        payload: new.payload,
    })
}

pub(crate) fn build_updated(state: &SubjectState, patch: &BlockPatch) -> Result<Block, StoreError> {
    if patch.duration == 0 {
        return Err(StoreError::Invalid("duration must be at least one week"));
    }
    let current = state.get(patch.id).ok_or(StoreError::NotFound(patch.id))?;
    Ok(patch.applied_to(current))
}

pub(crate) fn build_deleted(state: &SubjectState, id: BlockId) -> Result<Event, StoreError> {
    state.get(id).ok_or(StoreError::NotFound(id))?;
    Ok(Event::BlockDeleted {
        id,
        subject_id: state.id,
    })
}

#[async_trait]
impl BlockStore for InMemoryStore {
    async fn list_blocks(&self, subject_id: SubjectId) -> Result<Vec<Block>, StoreError> {
        Ok(match self.get_subject(&subject_id) {
            Some(state) => state.read().await.blocks.clone(),
            None => Vec::new(),
        })
    }

    async fn create_block(&self, block: NewBlock) -> Result<Block, StoreError> {
        let mut guard = self.lock_subject(block.subject_id).await;
        let block = build_created(&guard, block)?;
        self.apply_event(&mut guard, &Event::BlockCreated { block: block.clone() });
        Ok(block)
    }

    async fn update_block(&self, patch: BlockPatch) -> Result<Block, StoreError> {
        let mut guard = self.lock_block_subject(patch.id).await?;
        let block = build_updated(&guard, &patch)?;
        self.apply_event(&mut guard, &Event::BlockUpdated { block: block.clone() });
        Ok(block)
    }

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError> {
        let mut guard = self.lock_block_subject(id).await?;
        let event = build_deleted(&guard, id)?;
        self.apply_event(&mut guard, &event);
        Ok(())
    }
}
