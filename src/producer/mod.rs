//! Producers: the fetching side of a processor run
//!
//! A producer first sizes the result set with [`Producer::fetch_initial_data`]
//! and then pushes chunks into the queue from [`Producer::run_loop`]. The loop
//! must leave the queue marked as finished on every exit path; implementations
//! hold a [`ProducerFinishedGuard`](crate::queue::ProducerFinishedGuard) for the
//! duration of the loop.

use crate::error::Result;
use crate::queue::ChunkQueue;
use async_trait::async_trait;

mod db;
mod nvd_api;

pub use db::DatabaseProducer;
pub use nvd_api::NvdApiProducer;

/// Source side of a processor run
#[async_trait]
pub trait Producer<T: Send>: Send {
    /// Acquire the upstream resource and reset state left by a previous run
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the upstream resource; called on every exit path after `open`
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of items this run will deliver
    ///
    /// Zero means there is nothing to do and the run loops are skipped.
    async fn fetch_initial_data(&mut self) -> Result<u64>;

    /// Push every item into `queue` as chunks of at most `queue.chunk_size()`
    async fn run_loop(&mut self, queue: &ChunkQueue<T>) -> Result<()>;
}

/// Apply an optional cap to the number of available items
pub(crate) fn capped_total(available: u64, cap: Option<u64>) -> u64 {
    match cap {
        Some(cap) => cap.min(available),
        None => available,
    }
}
