//! Bounded chunk queue between one producer and one worker
//!
//! The queue holds at most `capacity` chunks. [`ChunkQueue::put_chunk`] suspends
//! while the queue is full and [`ChunkQueue::get_chunk`] suspends while it is
//! empty, which gives the producer backpressure from a slow destination.
//!
//! Completion is tracked the same way as a task queue: every dequeued chunk has
//! to be acknowledged with [`ChunkQueue::chunk_processed`], and
//! [`ChunkQueue::join`] resolves once every enqueued chunk was acknowledged.

use crate::error::{Error, Result};
use crate::types::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore, broadcast};

/// Bounded FIFO of item chunks with producer-finished signalling
pub struct ChunkQueue<T> {
    buf: Mutex<VecDeque<Vec<T>>>,
    /// Free slots, one permit per chunk that can still be enqueued
    slots: Semaphore,
    /// Queued chunks, one permit per chunk waiting to be dequeued
    items: Semaphore,
    capacity: usize,
    chunk_size: usize,
    finished: AtomicBool,
    /// Chunks enqueued but not yet acknowledged
    unfinished: AtomicUsize,
    all_processed: Notify,
    total_items: AtomicU64,
    fetched: AtomicU64,
    processed: AtomicU64,
    event_tx: broadcast::Sender<Event>,
}

impl<T> ChunkQueue<T> {
    /// Create a queue whose progress events are dropped
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(16);
        Self::with_events(capacity, chunk_size, event_tx)
    }

    /// Create a queue that reports progress on `event_tx`
    ///
    /// A capacity of zero is treated as one.
    pub fn with_events(
        capacity: usize,
        chunk_size: usize,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            items: Semaphore::new(0),
            capacity,
            chunk_size: chunk_size.max(1),
            finished: AtomicBool::new(false),
            unfinished: AtomicUsize::new(0),
            all_processed: Notify::new(),
            total_items: AtomicU64::new(1),
            fetched: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Maximum number of chunks held at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum number of items per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently waiting to be dequeued
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no chunk is waiting to be dequeued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Expected number of items in this run (1 until sizing is known)
    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Relaxed)
    }

    /// Set the expected number of items once sizing is known
    pub fn set_total_items(&self, total: u64) {
        self.total_items.store(total, Ordering::Relaxed);
    }

    /// Enqueue a chunk, suspending while the queue is full
    pub async fn put_chunk(&self, chunk: Vec<T>) -> Result<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| Error::Other("chunk queue closed".to_string()))?;
        permit.forget();

        let mut buf = self.lock();
        self.push_locked(&mut buf, chunk);
        Ok(())
    }

    /// Dequeue the oldest chunk, suspending while the queue is empty
    ///
    /// The returned chunk may be the empty end-of-stream marker pushed by
    /// [`ChunkQueue::set_producer_finished`]; it must be acknowledged like any
    /// other chunk.
    pub async fn get_chunk(&self) -> Result<Vec<T>> {
        let permit = self
            .items
            .acquire()
            .await
            .map_err(|_| Error::Other("chunk queue closed".to_string()))?;
        permit.forget();

        let chunk = self.lock().pop_front().unwrap_or_default();
        self.slots.add_permits(1);
        Ok(chunk)
    }

    /// False once the producer finished and every chunk was dequeued
    ///
    /// This is a snapshot; the worker re-checks it after each chunk.
    pub fn more_chunks_expected(&self) -> bool {
        let buf = self.lock();
        !(self.finished.load(Ordering::SeqCst) && buf.is_empty())
    }

    /// Whether the producer signalled that no more chunks will arrive
    pub fn producer_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Mark the producer as finished
    ///
    /// Idempotent. Also pushes one empty chunk without waiting so a worker parked
    /// in [`ChunkQueue::get_chunk`] wakes up; when the queue is full the marker is
    /// skipped because the worker will drain the queue and observe the flag.
    pub fn set_producer_finished(&self) {
        let mut buf = self.lock();
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.push_locked(&mut buf, Vec::new());
            }
            Err(_) => {
                tracing::trace!("queue full, skipping end-of-stream marker");
            }
        }
    }

    /// Acknowledge that a dequeued chunk was fully handled
    pub fn chunk_processed(&self) -> Result<()> {
        match self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.all_processed.notify_waiters();
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(_) => Err(Error::Other(
                "chunk_processed() called more times than chunks were queued".to_string(),
            )),
        }
    }

    /// Wait until every enqueued chunk has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.all_processed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Record `count` items fetched by the producer and emit a progress event
    pub fn report_fetched(&self, count: u64) {
        let fetched = self.fetched.fetch_add(count, Ordering::Relaxed) + count;
        self.emit(Event::Fetched {
            count: fetched,
            total: self.total_items(),
        });
    }

    /// Record `count` items handled by the worker and emit a progress event
    pub fn report_processed(&self, count: u64) {
        let processed = self.processed.fetch_add(count, Ordering::Relaxed) + count;
        self.emit(Event::Processed {
            count: processed,
            total: self.total_items(),
        });
    }

    /// Send an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn push_locked(&self, buf: &mut MutexGuard<'_, VecDeque<Vec<T>>>, chunk: Vec<T>) {
        buf.push_back(chunk);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.items.add_permits(1);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<T>>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Calls [`ChunkQueue::set_producer_finished`] when dropped
///
/// Producers hold one for the duration of their loop so the worker is released
/// on every exit path, including errors and cancellation.
pub struct ProducerFinishedGuard<'a, T> {
    queue: &'a ChunkQueue<T>,
}

impl<'a, T> ProducerFinishedGuard<'a, T> {
    /// Guard marking `queue` finished when it goes out of scope
    pub fn new(queue: &'a ChunkQueue<T>) -> Self {
        Self { queue }
    }
}

impl<T> Drop for ProducerFinishedGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.set_producer_finished();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = ChunkQueue::new(4, 3);
        queue.put_chunk(vec![1, 2, 3]).await.unwrap();
        queue.put_chunk(vec![4, 5]).await.unwrap();
        queue.put_chunk(vec![6]).await.unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get_chunk().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(queue.get_chunk().await.unwrap(), vec![4, 5]);
        assert_eq!(queue.get_chunk().await.unwrap(), vec![6]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_put_suspends_when_full() {
        let queue = Arc::new(ChunkQueue::new(2, 1));
        queue.put_chunk(vec![1]).await.unwrap();
        queue.put_chunk(vec![2]).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put_chunk(vec![3]).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "third put must wait for a free slot");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get_chunk().await.unwrap(), vec![1]);
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("put should complete after a get")
            .unwrap()
            .unwrap();
        assert_eq!(queue.get_chunk().await.unwrap(), vec![2]);
        assert_eq!(queue.get_chunk().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_finished_unblocks_parked_worker() {
        let queue = Arc::new(ChunkQueue::<u32>::new(2, 10));

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let chunk = queue.get_chunk().await.unwrap();
                queue.chunk_processed().unwrap();
                (chunk, queue.more_chunks_expected())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.set_producer_finished();

        let (chunk, more) = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should be woken by the end-of-stream marker")
            .unwrap();
        assert!(chunk.is_empty());
        assert!(!more);
        queue.join().await;
    }

    #[tokio::test]
    async fn test_set_producer_finished_is_idempotent() {
        let queue = ChunkQueue::<u32>::new(3, 10);
        queue.set_producer_finished();
        queue.set_producer_finished();

        assert!(queue.producer_finished());
        assert_eq!(queue.len(), 1, "only one end-of-stream marker is pushed");
    }

    #[tokio::test]
    async fn test_marker_skipped_when_full() {
        let queue = ChunkQueue::new(1, 10);
        queue.put_chunk(vec![7]).await.unwrap();
        queue.set_producer_finished();

        assert_eq!(queue.len(), 1);
        assert!(queue.more_chunks_expected());
        assert_eq!(queue.get_chunk().await.unwrap(), vec![7]);
        queue.chunk_processed().unwrap();
        assert!(!queue.more_chunks_expected());
        queue.join().await;
    }

    #[tokio::test]
    async fn test_more_chunks_expected() {
        let queue = ChunkQueue::new(2, 10);
        assert!(queue.more_chunks_expected());

        queue.put_chunk(vec![1]).await.unwrap();
        queue.set_producer_finished();
        assert!(queue.more_chunks_expected(), "queued chunks are still expected");

        queue.get_chunk().await.unwrap();
        queue.chunk_processed().unwrap();
        assert!(queue.more_chunks_expected(), "marker is still queued");

        assert!(queue.get_chunk().await.unwrap().is_empty());
        queue.chunk_processed().unwrap();
        assert!(!queue.more_chunks_expected());
    }

    #[tokio::test]
    async fn test_join_waits_for_all_acknowledgements() {
        let queue = Arc::new(ChunkQueue::new(3, 10));
        queue.put_chunk(vec![1]).await.unwrap();
        queue.put_chunk(vec![2]).await.unwrap();

        let joiner = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.join().await })
        };

        queue.get_chunk().await.unwrap();
        queue.chunk_processed().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished(), "one chunk is still unacknowledged");

        queue.get_chunk().await.unwrap();
        queue.chunk_processed().unwrap();
        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .expect("join should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_on_untouched_queue_returns() {
        let queue = ChunkQueue::<u8>::new(1, 1);
        tokio::time::timeout(Duration::from_millis(100), queue.join())
            .await
            .expect("empty queue is already joined");
    }

    #[test]
    fn test_over_acknowledgement_is_an_error() {
        let queue = ChunkQueue::<u8>::new(1, 1);
        assert!(queue.chunk_processed().is_err());
    }

    #[tokio::test]
    async fn test_guard_marks_finished_on_drop() {
        let queue = ChunkQueue::<u8>::new(2, 1);
        {
            let _guard = ProducerFinishedGuard::new(&queue);
            assert!(!queue.producer_finished());
        }
        assert!(queue.producer_finished());
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let queue = ChunkQueue::<u8>::with_events(2, 5, tx);
        queue.set_total_items(10);

        queue.report_fetched(5);
        queue.report_processed(5);
        queue.report_processed(3);

        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Fetched { count: 5, total: 10 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Processed { count: 5, total: 10 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Processed { count: 8, total: 10 }
        ));
    }
}
