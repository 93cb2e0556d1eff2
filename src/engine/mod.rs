mod error;
mod executor;
mod orderer;
mod resolver;
mod validate;

pub use error::EngineError;
pub use executor::apply;
pub use orderer::{describe, Preview};
pub use resolver::{resolve, MutationPlan, Overlap};

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::model::*;
use crate::observability::{COMMIT_DURATION_SECONDS, RESOLUTIONS_TOTAL};
use crate::store::BlockStore;

use validate::validate_request;

/// A block as the caller proposes it: raw date, explicit edit target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeRequest {
    pub subject_id: SubjectId,
    /// Any day; snapped to the Monday of its week.
    pub start: NaiveDate,
    pub duration: u32,
    pub payload: Payload,
    /// Set when editing an existing block.
    pub editing_id: Option<BlockId>,
}

/// Entry point for front ends: preview first, commit on confirmation.
///
/// Resolutions for the same subject must be serialized by the caller; the
/// scheduler takes no locks of its own.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn BlockStore>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Validate a proposal and compute its preview. Invalid requests fail
    /// before any store call.
    pub async fn propose_block(&self, req: ProposeRequest) -> Result<Proposal, EngineError> {
        let candidate = validate_request(req)?;
        let existing = self.store.list_blocks(candidate.subject_id).await?;
        ensure_editable(&existing, &candidate)?;
        let preview = describe(&existing, &candidate)?;
        debug!(
            subject = %candidate.subject_id,
            start = %candidate.start,
            weeks = candidate.duration,
            block_number = preview.block_number,
            "block proposed"
        );
        Ok(Proposal {
            preview,
            candidate,
            store: self.store.clone(),
        })
    }
}

/// A validated, not yet persisted block.
pub struct Proposal {
    pub preview: Preview,
    candidate: BlockDraft,
    store: Arc<dyn BlockStore>,
}

impl Proposal {
    pub fn candidate(&self) -> &BlockDraft {
        &self.candidate
    }

    /// Resolve against the subject's current blocks and persist.
    ///
    /// Blocks are fetched again here, so a stale preview never drives the plan.
    pub async fn commit(self) -> Result<Block, EngineError> {
        let started = Instant::now();
        let result = self.resolve_and_apply().await;
        metrics::histogram!(COMMIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(block) => {
                info!(block = %block.id, subject = %block.subject_id, start = %block.start, weeks = block.duration, "block committed");
                "ok"
            }
            Err(EngineError::Store(e)) => {
                warn!(subject = %self.candidate.subject_id, error = %e, "commit failed; subject may be partially resolved");
                "store_error"
            }
            Err(e) => {
                warn!(subject = %self.candidate.subject_id, error = %e, "commit rejected");
                "rejected"
            }
        };
        metrics::counter!(RESOLUTIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn resolve_and_apply(&self) -> Result<Block, EngineError> {
        let existing = self.store.list_blocks(self.candidate.subject_id).await?;
        ensure_editable(&existing, &self.candidate)?;
        let plan = resolve(&existing, &self.candidate, self.candidate.id)?;
        debug!(
            deletes = plan.deletes.len(),
            updates = plan.updates.len(),
            creates = plan.creates.len(),
            "mutation plan computed"
        );
        apply(plan, &self.candidate, &*self.store).await
    }
}

/// An edit must target one of the subject's own blocks.
fn ensure_editable(existing: &[Block], candidate: &BlockDraft) -> Result<(), EngineError> {
    match candidate.id {
        Some(id) if !existing.iter().any(|b| b.id == id) => Err(EngineError::NotFound(id)),
        _ => Ok(()),
    }
}
