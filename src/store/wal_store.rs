use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::memory::{build_created, build_deleted, build_updated, InMemoryStore};
use super::{BlockStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Background task owning the WAL. Appends already queued when the first one
/// arrives share a single fsync, so a fanned-out mutation plan costs about
/// one disk flush.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_other(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let result = append_result.and(wal.flush_sync());
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// Durable `BlockStore`: every mutation is logged before it becomes visible,
/// then broadcast on the `NotifyHub`.
pub struct WalStore {
    memory: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    /// Mutations hold this shared, compaction exclusively, so nothing is
    /// appended between the snapshot and the file swap. Always taken before
    /// any subject lock.
    compaction: RwLock<()>,
}

impl WalStore {
    /// Replay the WAL at `path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&path)?;
        let memory = InMemoryStore::from_events(&events);
        info!(
            events = events.len(),
            subjects = memory.subject_count(),
            "replayed {}",
            path.display()
        );
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            memory,
            wal_tx,
            notify,
            compaction: RwLock::new(()),
        })
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append + apply + notify. Caller holds the compaction and subject locks.
    async fn persist_and_apply(&self, state: &mut SubjectState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        self.memory.apply_event(state, event);
        self.notify.send(event);
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction.write().await;
        let events = self.memory.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact once the log has grown by `threshold` appends. Returns whether it ran.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, StoreError> {
        if self.appends_since_compact().await < threshold {
            return Ok(false);
        }
        self.compact().await?;
        Ok(true)
    }
}

#[async_trait]
impl BlockStore for WalStore {
    async fn list_blocks(&self, subject_id: SubjectId) -> Result<Vec<Block>, StoreError> {
        self.memory.list_blocks(subject_id).await
    }

    async fn create_block(&self, block: NewBlock) -> Result<Block, StoreError> {
        let _shared = self.compaction.read().await;
        let mut guard = self.memory.lock_subject(block.subject_id).await;
        let block = build_created(&guard, block)?;
        self.persist_and_apply(&mut guard, &Event::BlockCreated { block: block.clone() })
            .await?;
        Ok(block)
    }

    async fn update_block(&self, patch: BlockPatch) -> Result<Block, StoreError> {
        let _shared = self.compaction.read().await;
        let mut guard = self.memory.lock_block_subject(patch.id).await?;
        let block = build_updated(&guard, &patch)?;
        self.persist_and_apply(&mut guard, &Event::BlockUpdated { block: block.clone() })
            .await?;
        Ok(block)
    }

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        let mut guard = self.memory.lock_block_subject(id).await?;
        let event = build_deleted(&guard, id)?;
        self.persist_and_apply(&mut guard, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("blockplan_test_wal_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn new_block(subject_id: SubjectId, start: i64, duration: u32) -> NewBlock {
        NewBlock {
            subject_id,
            start: WeekPoint::from_index(start),
            duration,
            payload: Payload::new("taper", ["recovery"]),
        }
    }

    #[tokio::test]
    async fn reopen_replays_state() {
        let path = test_wal_path("reopen.wal");
        let s = Ulid::new();
        let (kept, moved) = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            let a = store.create_block(new_block(s, 0, 4)).await.unwrap();
            let b = store.create_block(new_block(s, 10, 4)).await.unwrap();
            let c = store.create_block(new_block(s, 20, 4)).await.unwrap();
            store.delete_block(a.id).await.unwrap();
            let moved = store
                .update_block(BlockPatch {
                    id: c.id,
                    start: Some(WeekPoint::from_index(30)),
                    duration: 2,
                    payload: None,
                })
                .await
                .unwrap();
            (b, moved)
        };

        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(store.list_blocks(s).await.unwrap(), vec![kept, moved]);
    }

    #[tokio::test]
    async fn concurrent_creates_all_persist() {
        let path = test_wal_path("concurrent.wal");
        let s = Ulid::new();
        {
            let store = Arc::new(WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap());
            let handles: Vec<_> = (0..20)
                .map(|i| {
                    let store = store.clone();
                    tokio::spawn(async move { store.create_block(new_block(s, i * 2, 1)).await })
                })
                .collect();
            for h in handles {
                h.await.unwrap().unwrap();
            }
        }
        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(store.list_blocks(s).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let path = test_wal_path("notify.wal");
        let notify = Arc::new(NotifyHub::new());
        let store = WalStore::open(path, notify.clone()).unwrap();
        let s = Ulid::new();
        let mut rx = store.notify().subscribe(s);

        let a = store.create_block(new_block(s, 0, 4)).await.unwrap();
        store.delete_block(a.id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Event::BlockCreated { block: a.clone() });
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::BlockDeleted {
                id: a.id,
                subject_id: s
            }
        );
    }

    #[tokio::test]
    async fn failed_mutation_is_not_logged() {
        let path = test_wal_path("failed.wal");
        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert!(store.delete_block(Ulid::new()).await.is_err());
        assert!(store.create_block(new_block(Ulid::new(), 0, 0)).await.is_err());
        assert_eq!(store.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let s = Ulid::new();
        let survivor = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            for i in 0..5 {
                let b = store.create_block(new_block(s, i * 4, 2)).await.unwrap();
                store.delete_block(b.id).await.unwrap();
            }
            let survivor = store.create_block(new_block(s, 100, 3)).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 11);

            assert!(!store.compact_if_needed(50).await.unwrap());
            assert!(store.compact_if_needed(10).await.unwrap());
            assert_eq!(store.appends_since_compact().await, 0);
            survivor
        };

        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(store.list_blocks(s).await.unwrap(), vec![survivor]);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_reopen() {
        use std::io::Write;

        let path = test_wal_path("torn_reopen.wal");
        let s = Ulid::new();
        let first = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            store.create_block(new_block(s, 0, 4)).await.unwrap()
        };
        {
            // crash part way through a frame
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let second = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            assert_eq!(store.list_blocks(s).await.unwrap(), vec![first.clone()]);
            store.create_block(new_block(s, 10, 2)).await.unwrap()
        };

        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(store.list_blocks(s).await.unwrap(), vec![first, second]);
    }
}
