use super::Producer;
use crate::db::{ItemFilter, ItemStore};
use crate::error::Result;
use crate::models::ScapItem;
use crate::queue::{ChunkQueue, ProducerFinishedGuard};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::marker::PhantomData;

/// Producer streaming items out of an [`ItemStore`]
///
/// Rows are read incrementally and flushed as soon as `chunk_size` items have
/// accumulated; the last chunk may be shorter.
pub struct DatabaseProducer<T, S> {
    store: S,
    filter: ItemFilter,
    total: u64,
    _item: PhantomData<fn() -> T>,
}

impl<T, S> DatabaseProducer<T, S>
where
    T: ScapItem,
    S: ItemStore<T>,
{
    /// Producer reading the items `filter` selects
    pub fn new(store: S, filter: ItemFilter) -> Self {
        Self {
            store,
            filter,
            total: 0,
            _item: PhantomData,
        }
    }

    /// Row selection used for sizing and streaming
    pub fn filter(&self) -> &ItemFilter {
        &self.filter
    }
}

#[async_trait]
impl<T, S> Producer<T> for DatabaseProducer<T, S>
where
    T: ScapItem,
    S: ItemStore<T>,
{
    async fn open(&mut self) -> Result<()> {
        self.total = 0;
        Ok(())
    }

    async fn fetch_initial_data(&mut self) -> Result<u64> {
        self.total = self.store.count(&self.filter).await?;
        tracing::info!(filter = ?self.filter, "Found {} stored {}", self.total, T::TYPE_PLURAL);
        Ok(self.total)
    }

    async fn run_loop(&mut self, queue: &ChunkQueue<T>) -> Result<()> {
        let _finished = ProducerFinishedGuard::new(queue);

        let chunk_size = queue.chunk_size();
        let mut rows = self.store.stream(&self.filter);
        let mut chunk = Vec::with_capacity(chunk_size);
        let mut fetched = 0u64;

        while let Some(item) = rows.try_next().await? {
            chunk.push(item);
            if chunk.len() >= chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                let count = full.len() as u64;
                queue.put_chunk(full).await?;
                queue.report_fetched(count);
                fetched += count;
                tracing::debug!(fetched, total = self.total, "Queued chunk of {}", T::TYPE_PLURAL);
            }
        }

        if !chunk.is_empty() {
            let count = chunk.len() as u64;
            queue.put_chunk(chunk).await?;
            queue.report_fetched(count);
            fetched += count;
        }

        tracing::info!("Read {} {} from the database", fetched, T::TYPE_PLURAL);
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConflictPolicy, Database};
    use crate::models::{Cve, nvd_timestamp};
    use tempfile::NamedTempFile;

    fn cve(i: usize) -> Cve {
        Cve {
            id: format!("CVE-2023-{:04}", i),
            source_identifier: "cve@mitre.org".to_string(),
            published: nvd_timestamp::parse("2023-01-01T00:00:00.000").unwrap(),
            last_modified: nvd_timestamp::parse("2023-01-01T00:00:00.000").unwrap(),
            vuln_status: "Analyzed".to_string(),
            descriptions: vec![],
            references: vec![],
        }
    }

    #[tokio::test]
    async fn test_streams_full_and_partial_chunks() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        let items: Vec<Cve> = (0..8).map(cve).collect();
        db.upsert(items.as_slice(), ConflictPolicy::Update).await.unwrap();

        let mut producer: DatabaseProducer<Cve, _> =
            DatabaseProducer::new(db.clone(), ItemFilter::default());
        assert_eq!(producer.fetch_initial_data().await.unwrap(), 8);

        let queue = ChunkQueue::new(8, 3);
        producer.run_loop(&queue).await.unwrap();
        assert!(queue.producer_finished());

        let mut sizes = Vec::new();
        let mut ids = Vec::new();
        while queue.more_chunks_expected() {
            let chunk = queue.get_chunk().await.unwrap();
            queue.chunk_processed().unwrap();
            if !chunk.is_empty() {
                sizes.push(chunk.len());
                ids.extend(chunk.into_iter().map(|c| c.id));
            }
        }
        assert_eq!(sizes, vec![3, 3, 2]);
        assert_eq!(ids, items.into_iter().map(|c| c.id).collect::<Vec<_>>());

        producer.close().await.unwrap();
        assert!(!db.pool().is_closed(), "the database outlives the producer");
        db.close().await;
    }

    #[tokio::test]
    async fn test_empty_table_counts_zero() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();

        let mut producer: DatabaseProducer<Cve, _> =
            DatabaseProducer::new(db.clone(), ItemFilter::default());
        assert_eq!(producer.fetch_initial_data().await.unwrap(), 0);
        producer.close().await.unwrap();
        db.close().await;
    }
}
