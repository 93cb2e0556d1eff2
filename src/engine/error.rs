use thiserror::Error;

use crate::model::BlockId;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any store call.
    #[error("invalid block: {0}")]
    Validation(&'static str),
    #[error("block not found: {0}")]
    NotFound(BlockId),
    /// The computed plan would leave overlapping blocks behind. Only reachable
    /// when the stored timeline already overlapped.
    #[error("conflict plan invariant violated: {0}")]
    ConflictPlan(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
