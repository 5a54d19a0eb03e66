//! In-memory producer and worker doubles

use async_trait::async_trait;
use scap_feed::{ChunkQueue, Error, Producer, ProducerFinishedGuard, Result, Worker};

/// Producer replaying a fixed list of chunks
#[derive(Default)]
pub struct MockProducer {
    pub chunks: Vec<Vec<u32>>,
    /// Chunks pushed into the queue so far
    pub enqueued: usize,
    pub run_loop_calls: usize,
    /// Set once the loop pushed every chunk
    pub completed: bool,
    /// Suspend forever after pushing this many chunks
    pub stall_after: Option<usize>,
    pub closed: bool,
}

impl MockProducer {
    pub fn new(chunks: Vec<Vec<u32>>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    /// `count` chunks of `size` consecutive items starting at 1
    pub fn sequential(count: usize, size: usize) -> Self {
        let chunks = (0..count)
            .map(|c| ((c * size + 1)..=((c + 1) * size)).map(|i| i as u32).collect())
            .collect();
        Self::new(chunks)
    }
}

#[async_trait]
impl Producer<u32> for MockProducer {
    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    async fn fetch_initial_data(&mut self) -> Result<u64> {
        Ok(self.chunks.iter().map(|c| c.len() as u64).sum())
    }

    async fn run_loop(&mut self, queue: &ChunkQueue<u32>) -> Result<()> {
        let _finished = ProducerFinishedGuard::new(queue);
        self.run_loop_calls += 1;

        for chunk in self.chunks.clone() {
            if self.stall_after == Some(self.enqueued) {
                std::future::pending::<()>().await;
            }
            let count = chunk.len() as u64;
            queue.put_chunk(chunk).await?;
            queue.report_fetched(count);
            self.enqueued += 1;
        }

        self.completed = true;
        Ok(())
    }
}

/// Worker recording every chunk it receives
#[derive(Default)]
pub struct MockWorker {
    /// Chunks committed successfully, in arrival order
    pub committed: Vec<Vec<u32>>,
    pub handle_calls: usize,
    /// Fail the n-th call to `handle_chunk` (1-based)
    pub fail_on_call: Option<usize>,
    pub loop_ended: bool,
    pub closed: bool,
}

impl MockWorker {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Default::default()
        }
    }

    pub fn items(&self) -> Vec<u32> {
        self.committed.iter().flatten().copied().collect()
    }
}

#[async_trait]
impl Worker<u32> for MockWorker {
    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    async fn handle_chunk(&mut self, chunk: Vec<u32>) -> Result<()> {
        self.handle_calls += 1;
        if self.fail_on_call == Some(self.handle_calls) {
            return Err(Error::Other(format!(
                "write failed on chunk {}",
                self.handle_calls
            )));
        }
        self.committed.push(chunk);
        Ok(())
    }

    async fn loop_end(&mut self, _processed: u64) -> Result<()> {
        self.loop_ended = true;
        Ok(())
    }
}
