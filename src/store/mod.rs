mod memory;
mod wal_store;

pub use memory::{InMemoryStore, SharedSubjectState};
pub use wal_store::WalStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block not found: {0}")]
    NotFound(BlockId),
    #[error("invalid block: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for blocks.
///
/// Implementations must tolerate concurrent calls: the executor dispatches a
/// whole mutation plan at once.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// All blocks of a subject, sorted by start. Unknown subjects have none.
    async fn list_blocks(&self, subject_id: SubjectId) -> Result<Vec<Block>, StoreError>;

    async fn create_block(&self, block: NewBlock) -> Result<Block, StoreError>;

    async fn update_block(&self, patch: BlockPatch) -> Result<Block, StoreError>;

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError>;
}
