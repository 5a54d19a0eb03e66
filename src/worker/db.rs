use super::Worker;
use crate::db::{ConflictPolicy, ItemStore};
use crate::error::Result;
use crate::models::ScapItem;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Worker upserting every chunk into an [`ItemStore`]
///
/// Each chunk is written in its own transaction; a failing chunk leaves no
/// partial rows behind and is not retried. The store stays open after
/// [`Worker::close`], so one worker can serve several runs.
pub struct DatabaseWriteWorker<T, S> {
    store: S,
    policy: ConflictPolicy,
    written: u64,
    _item: PhantomData<fn() -> T>,
}

impl<T, S> DatabaseWriteWorker<T, S>
where
    T: ScapItem,
    S: ItemStore<T>,
{
    /// Worker writing into `store` with the given conflict policy
    pub fn new(store: S, policy: ConflictPolicy) -> Self {
        Self {
            store,
            policy,
            written: 0,
            _item: PhantomData,
        }
    }

    /// Rows inserted or updated by the current run (skipped conflicts are not counted)
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl<T, S> Worker<T> for DatabaseWriteWorker<T, S>
where
    T: ScapItem,
    S: ItemStore<T>,
{
    async fn open(&mut self) -> Result<()> {
        self.written = 0;
        Ok(())
    }

    async fn handle_chunk(&mut self, chunk: Vec<T>) -> Result<()> {
        self.written += self.store.upsert(&chunk, self.policy).await?;
        Ok(())
    }

    async fn loop_start(&mut self, total: u64) -> Result<()> {
        tracing::info!(policy = ?self.policy, "Storing {} {}", total, T::TYPE_PLURAL);
        Ok(())
    }

    async fn loop_end(&mut self, processed: u64) -> Result<()> {
        tracing::info!(
            written = self.written,
            "Stored {} {} in the database",
            processed,
            T::TYPE_PLURAL
        );
        Ok(())
    }
}
