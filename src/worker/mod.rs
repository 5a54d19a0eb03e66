//! Workers: the committing side of a processor run
//!
//! [`run_loop`] drains the queue while the producer is active or chunks remain
//! and hands every chunk to [`Worker::handle_chunk`]. A chunk is acknowledged
//! only after it was committed, so [`ChunkQueue::join`] resolves once the
//! destination holds everything the producer enqueued.

use crate::error::Result;
use crate::queue::ChunkQueue;
use crate::types::Event;
use async_trait::async_trait;

mod db;
mod json;

pub use db::DatabaseWriteWorker;
pub use json::JsonWriteWorker;

/// Destination side of a processor run
#[async_trait]
pub trait Worker<T: Send>: Send {
    /// Acquire the destination resource and reset state left by a previous run
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the destination resource; called on every exit path after `open`
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Commit one chunk to the destination
    async fn handle_chunk(&mut self, chunk: Vec<T>) -> Result<()>;

    /// Called once before the first chunk is requested
    async fn loop_start(&mut self, _total: u64) -> Result<()> {
        Ok(())
    }

    /// Called after each committed chunk with the running item count
    async fn loop_step_end(&mut self, _processed: u64) -> Result<()> {
        Ok(())
    }

    /// Called once after the queue was drained
    async fn loop_end(&mut self, _processed: u64) -> Result<()> {
        Ok(())
    }
}

/// Drain `queue` into `worker`, returning the number of items processed
///
/// The empty end-of-stream marker is acknowledged without reaching
/// [`Worker::handle_chunk`]. Errors from the worker abort the loop without
/// acknowledging the failed chunk; dropping the returned future stops the loop
/// at its current suspension point.
pub async fn run_loop<T, W>(worker: &mut W, queue: &ChunkQueue<T>) -> Result<u64>
where
    T: Send,
    W: Worker<T> + ?Sized,
{
    let mut processed = 0u64;
    worker.loop_start(queue.total_items()).await?;

    while queue.more_chunks_expected() {
        let chunk = queue.get_chunk().await?;
        if chunk.is_empty() {
            queue.chunk_processed()?;
            continue;
        }

        let count = chunk.len() as u64;
        worker.handle_chunk(chunk).await?;
        processed += count;
        queue.report_processed(count);
        queue.chunk_processed()?;

        tracing::debug!(processed, total = queue.total_items(), "Committed chunk");
        worker.loop_step_end(processed).await?;
    }

    worker.loop_end(processed).await?;
    queue.emit(Event::Finished { processed });
    Ok(processed)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<Vec<u32>>,
        steps: Vec<u64>,
        ended_with: Option<u64>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Worker<u32> for Recorder {
        async fn handle_chunk(&mut self, chunk: Vec<u32>) -> Result<()> {
            if self.fail_on == Some(self.chunks.len() + 1) {
                return Err(Error::Other("destination unavailable".to_string()));
            }
            self.chunks.push(chunk);
            Ok(())
        }

        async fn loop_step_end(&mut self, processed: u64) -> Result<()> {
            self.steps.push(processed);
            Ok(())
        }

        async fn loop_end(&mut self, processed: u64) -> Result<()> {
            self.ended_with = Some(processed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drains_until_producer_finished() {
        let queue = ChunkQueue::new(4, 2);
        queue.put_chunk(vec![1, 2]).await.unwrap();
        queue.put_chunk(vec![3]).await.unwrap();
        queue.set_producer_finished();

        let mut worker = Recorder::default();
        let processed = run_loop(&mut worker, &queue).await.unwrap();

        assert_eq!(processed, 3);
        assert_eq!(worker.chunks, vec![vec![1, 2], vec![3]]);
        assert_eq!(worker.steps, vec![2, 3]);
        assert_eq!(worker.ended_with, Some(3));
        queue.join().await;
    }

    #[tokio::test]
    async fn test_marker_is_not_handled() {
        let queue = ChunkQueue::<u32>::new(2, 2);
        queue.set_producer_finished();

        let mut worker = Recorder::default();
        assert_eq!(run_loop(&mut worker, &queue).await.unwrap(), 0);
        assert!(worker.chunks.is_empty());
        assert_eq!(worker.ended_with, Some(0));
    }

    #[tokio::test]
    async fn test_error_stops_the_loop() {
        let queue = ChunkQueue::new(4, 1);
        for i in 0..3 {
            queue.put_chunk(vec![i]).await.unwrap();
        }
        queue.set_producer_finished();

        let mut worker = Recorder {
            fail_on: Some(2),
            ..Default::default()
        };
        let err = run_loop(&mut worker, &queue).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(worker.chunks, vec![vec![0]]);
        assert_eq!(worker.ended_with, None);
        assert_eq!(queue.len(), 2, "remaining chunk and marker stay queued");
    }
}
