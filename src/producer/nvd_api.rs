use super::{Producer, capped_total};
use crate::config::{Config, RetryConfig};
use crate::error::Result;
use crate::models::ScapItem;
use crate::nvd::{NvdApi, PaginatedSource};
use crate::queue::{ChunkQueue, ProducerFinishedGuard};
use crate::retry::{RetryBudget, retry_with_budget};
use async_trait::async_trait;
use std::marker::PhantomData;

/// Producer reading a paginated API
///
/// Pages are republished as chunks unchanged; the queue's chunk size is only
/// passed upstream as the requested page size. One [`RetryBudget`] covers both
/// sizing and downloading, so failures spent in
/// [`Producer::fetch_initial_data`] are no longer available to the loop.
/// [`Producer::open`] starts a new session with a full budget.
pub struct NvdApiProducer<T, S> {
    source: S,
    retry: RetryConfig,
    budget: RetryBudget,
    request_results: Option<u64>,
    total: u64,
    _item: PhantomData<fn() -> T>,
}

impl<T: ScapItem> NvdApiProducer<T, NvdApi<T>> {
    /// Producer for the NVD endpoint of `T` using the `nvd` and `retry` settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = NvdApi::new(&config.nvd)?;
        Ok(Self::new(
            source,
            config.retry.clone(),
            config.nvd.request_results,
        ))
    }
}

impl<T, S> NvdApiProducer<T, S>
where
    T: ScapItem,
    S: PaginatedSource<T>,
{
    /// `request_results` caps the number of items fetched (None = all)
    pub fn new(source: S, retry: RetryConfig, request_results: Option<u64>) -> Self {
        let budget = RetryBudget::new(retry.attempts);
        Self {
            source,
            retry,
            budget,
            request_results,
            total: 0,
            _item: PhantomData,
        }
    }

    /// Retry budget state of this session
    pub fn retry_budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// The paginated source pages are read from
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<T, S> Producer<T> for NvdApiProducer<T, S>
where
    T: ScapItem,
    S: PaginatedSource<T>,
{
    async fn open(&mut self) -> Result<()> {
        self.budget = RetryBudget::new(self.retry.attempts);
        self.total = 0;
        Ok(())
    }

    async fn fetch_initial_data(&mut self) -> Result<u64> {
        if self.request_results == Some(0) {
            tracing::info!("0 {} requested, nothing to fetch", T::TYPE_PLURAL);
            self.total = 0;
            return Ok(0);
        }

        let source = &self.source;
        let available =
            retry_with_budget(&self.retry, &mut self.budget, || source.count()).await?;

        self.total = capped_total(available, self.request_results);
        if self.total == 0 {
            tracing::info!("No {} available upstream", T::TYPE_PLURAL);
        } else {
            tracing::info!(
                available,
                requested = ?self.request_results,
                "Fetching {} {}",
                self.total,
                T::TYPE_PLURAL
            );
        }
        Ok(self.total)
    }

    async fn run_loop(&mut self, queue: &ChunkQueue<T>) -> Result<()> {
        let _finished = ProducerFinishedGuard::new(queue);

        let page_size = queue.chunk_size() as u64;
        let mut offset = 0u64;

        while offset < self.total {
            let remaining = self.total - offset;
            let limit = page_size.min(remaining);

            let source = &self.source;
            let page = retry_with_budget(&self.retry, &mut self.budget, || {
                source.page(offset, limit)
            })
            .await?;

            let mut items = page.items;
            if items.is_empty() {
                tracing::warn!(
                    offset,
                    expected = self.total,
                    "Upstream returned an empty page, stopping early"
                );
                break;
            }
            if items.len() as u64 > remaining {
                items.truncate(remaining as usize);
            }

            let count = items.len() as u64;
            offset += count;
            queue.put_chunk(items).await?;
            queue.report_fetched(count);
            tracing::debug!(
                fetched = offset,
                total = self.total,
                remaining_attempts = self.budget.remaining(),
                "Queued page of {}",
                T::TYPE_PLURAL
            );

            if !page.has_more {
                break;
            }
        }

        tracing::info!("Fetched {} of {} {}", offset, self.total, T::TYPE_PLURAL);
        Ok(())
    }
}
