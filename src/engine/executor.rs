use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use crate::model::*;
use crate::observability::{PLAN_OPERATIONS_TOTAL, PLAN_OPERATION_FAILURES_TOTAL};
use crate::store::{BlockStore, StoreError};

use super::{EngineError, MutationPlan};

type PlanOp<'a> = BoxFuture<'a, Result<(), (&'static str, StoreError)>>;

/// Apply `plan` against `store`, then persist `candidate`.
///
/// Plan operations target disjoint blocks and are dispatched together. The
/// candidate is written only after every one of them has resolved, and only
/// if none failed. Operations that succeeded before a failure are not rolled
/// back: the subject may be left partially resolved and callers should
/// re-fetch it.
pub async fn apply(
    plan: MutationPlan,
    candidate: &BlockDraft,
    store: &dyn BlockStore,
) -> Result<Block, EngineError> {
    count_plan(&plan);
    let mut ops: Vec<PlanOp<'_>> = Vec::with_capacity(plan.len());
    for id in plan.deletes {
        ops.push(Box::pin(async move {
            store.delete_block(id).await.map_err(|e| ("delete", e))
        }));
    }
    for patch in plan.updates {
        ops.push(Box::pin(async move {
            store.update_block(patch).await.map(drop).map_err(|e| ("update", e))
        }));
    }
    for block in plan.creates {
        ops.push(Box::pin(async move {
            store.create_block(block).await.map(drop).map_err(|e| ("create", e))
        }));
    }

    let dispatched = ops.len();
    let mut first_failure = None;
    for result in join_all(ops).await {
        match result {
            Ok(()) => {}
            Err((kind, e)) => {
                metrics::counter!(PLAN_OPERATION_FAILURES_TOTAL, "kind" => kind).increment(1);
                warn!(kind, error = %e, "plan operation failed");
                first_failure.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e.into());
    }
    debug!(operations = dispatched, "mutation plan applied");

    commit(candidate, store).await
}

async fn commit(candidate: &BlockDraft, store: &dyn BlockStore) -> Result<Block, EngineError> {
    let block = match candidate.id {
        Some(id) => {
            store
                .update_block(BlockPatch {
                    id,
                    start: Some(candidate.start),
                    duration: candidate.duration,
                    payload: Some(candidate.payload.clone()),
                })
                .await?
        }
        None => {
            store
                .create_block(NewBlock {
                    subject_id: candidate.subject_id,
                    start: candidate.start,
                    duration: candidate.duration,
                    payload: candidate.payload.clone(),
                })
                .await?
        }
    };
    Ok(block)
}

/// Record dispatch counts per operation kind.
fn count_plan(plan: &MutationPlan) {
    for (kind, n) in [
        ("delete", plan.deletes.len()),
        ("update", plan.updates.len()),
        ("create", plan.creates.len()),
    ] {
        if n > 0 {
            metrics::counter!(PLAN_OPERATIONS_TOTAL, "kind" => kind).increment(n as u64);
        }
    }
}
