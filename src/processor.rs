//! Processor: one producer, one worker and one queue for a single run

use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::models::ScapItem;
use crate::producer::Producer;
use crate::queue::ChunkQueue;
use crate::types::Event;
use crate::worker::{self, Worker};
use std::marker::PhantomData;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Binds a [`Producer`] and a [`Worker`] to a bounded [`ChunkQueue`]
///
/// Both sides are opened before the result set is sized and closed on every
/// exit path afterwards. The run loops execute concurrently on the calling
/// task; the first failure drops the sibling loop and is returned unchanged.
pub struct Processor<T, P, W> {
    producer: P,
    worker: W,
    config: ProcessorConfig,
    event_tx: broadcast::Sender<Event>,
    _item: PhantomData<fn() -> T>,
}

impl<T, P, W> Processor<T, P, W>
where
    T: ScapItem,
    P: Producer<T>,
    W: Worker<T>,
{
    /// Processor using the item kind's default chunk size
    pub fn with_defaults(producer: P, worker: W) -> Self {
        Self::new(
            producer,
            worker,
            ProcessorConfig::with_chunk_size(T::DEFAULT_CHUNK_SIZE),
        )
    }
}

impl<T, P, W> Processor<T, P, W>
where
    T: Send,
    P: Producer<T>,
    W: Worker<T>,
{
    /// Processor with an explicit queue configuration
    pub fn new(producer: P, worker: W, config: ProcessorConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            producer,
            worker,
            config,
            event_tx,
            _item: PhantomData,
        }
    }

    /// Subscribe to progress events of subsequent runs
    ///
    /// Every subscriber receives all events independently. A receiver that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Queue configuration used for every run
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// The bound producer
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// The bound worker
    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// Take the producer and worker back, e.g. to inspect them after a run
    pub fn into_parts(self) -> (P, W) {
        (self.producer, self.worker)
    }

    /// Run the pipeline to completion, returning the number of processed items
    ///
    /// Returns `Ok(0)` without starting either run loop when the producer
    /// reports nothing to fetch. Otherwise returns only after every enqueued
    /// chunk was handed to the worker and acknowledged. A processor can run
    /// again afterwards; producer and worker start over in their `open`.
    pub async fn run(&mut self) -> Result<u64> {
        self.producer.open().await?;
        if let Err(e) = self.worker.open().await {
            if let Err(close_err) = self.producer.close().await {
                tracing::warn!(error = %close_err, "Failed to close producer");
            }
            return Err(e);
        }

        let result = self.run_opened().await;

        let producer_closed = self.producer.close().await;
        let worker_closed = self.worker.close().await;

        let processed = result?;
        producer_closed?;
        worker_closed?;
        Ok(processed)
    }

    /// Like [`run`](Self::run), but abort with [`Error::Cancelled`] once `token` fires
    ///
    /// Cancellation drops both run loops at their current suspension point; a
    /// chunk is either fully committed or never dequeued. Producer and worker
    /// are closed before returning.
    pub async fn run_with_cancellation(&mut self, token: CancellationToken) -> Result<u64> {
        let outcome = tokio::select! {
            result = self.run() => Some(result),
            _ = token.cancelled() => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                tracing::warn!("Run cancelled, closing producer and worker");
                if let Err(e) = self.producer.close().await {
                    tracing::warn!(error = %e, "Failed to close producer");
                }
                if let Err(e) = self.worker.close().await {
                    tracing::warn!(error = %e, "Failed to close worker");
                }
                Err(Error::Cancelled)
            }
        }
    }

    async fn run_opened(&mut self) -> Result<u64> {
        let total = self.producer.fetch_initial_data().await?;
        if total == 0 {
            tracing::info!("Nothing to process");
            return Ok(0);
        }

        let queue = ChunkQueue::with_events(
            self.config.queue_size,
            self.config.chunk_size,
            self.event_tx.clone(),
        );
        queue.set_total_items(total);
        queue.emit(Event::Started { total });
        tracing::info!(
            total,
            chunk_size = queue.chunk_size(),
            queue_size = queue.capacity(),
            "Starting producer and worker"
        );

        let producer = &mut self.producer;
        let worker = &mut self.worker;
        let queue = &queue;

        let ((), processed) = tokio::try_join!(
            async move {
                let produced = producer.run_loop(queue).await;
                // Releases the worker even if the producer never marked the queue
                queue.set_producer_finished();
                produced?;
                queue.join().await;
                Ok::<(), Error>(())
            },
            worker::run_loop(worker, queue),
        )?;

        tracing::info!(processed, total, "Run complete");
        Ok(processed)
    }
}
