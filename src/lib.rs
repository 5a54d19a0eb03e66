//! # scap-feed
//!
//! Producer/worker pipeline for ingesting NVD SCAP data (CPEs, CPE match
//! strings and CVEs) into SQLite or JSON documents.
//!
//! ## Design
//!
//! A run binds one [`Producer`] and one [`Worker`] to a bounded [`ChunkQueue`]:
//! - **Producers** size the result set and push chunks: [`NvdApiProducer`]
//!   pages through the NVD REST API, [`DatabaseProducer`] streams stored rows
//! - **Workers** commit chunks: [`DatabaseWriteWorker`] upserts one
//!   transaction per chunk, [`JsonWriteWorker`] assembles one NVD-style document
//! - **Backpressure** comes from the queue capacity; at most
//!   `chunk_size * queue_size` items are in memory
//! - **Event-driven** progress through [`Processor::subscribe`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use scap_feed::{
//!     Config, ConflictPolicy, Cve, Database, DatabaseWriteWorker, NvdApiProducer, Processor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let db = Database::new(&config.database.path).await?;
//!     let producer = NvdApiProducer::<Cve, _>::from_config(&config)?;
//!     let worker = DatabaseWriteWorker::new(
//!         db,
//!         ConflictPolicy::from_update_flag(config.database.update),
//!     );
//!
//!     let mut processor = Processor::<Cve, _, _>::new(producer, worker, config.processor.clone());
//!
//!     let mut events = processor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let processed = processor.run().await?;
//!     println!("Stored {} CVEs", processed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Error types
pub mod error;
/// NVD-style JSON documents
pub mod json;
/// SCAP item types
pub mod models;
/// NVD REST API access
pub mod nvd;
/// Producer/worker orchestration
pub mod processor;
/// Chunk producers
pub mod producer;
/// Bounded chunk queue
pub mod queue;
/// Retry logic with a session-wide budget
pub mod retry;
/// Progress events
pub mod types;
/// Chunk workers
pub mod worker;

// Re-export commonly used types
pub use config::{
    Config, DatabaseConfig, JsonOutputConfig, NvdApiConfig, ProcessorConfig, RequestFilter,
    RetryConfig,
};
pub use db::{ConflictPolicy, Database, ItemFilter, ItemStore};
pub use error::{DatabaseError, Error, FetchError, Result};
pub use json::{JsonDocument, SchemaValidator};
pub use models::{Cpe, CpeMatchString, Cve, ScapItem};
pub use nvd::{NvdApi, Page, PaginatedSource};
pub use processor::Processor;
pub use producer::{DatabaseProducer, NvdApiProducer, Producer};
pub use queue::{ChunkQueue, ProducerFinishedGuard};
pub use types::Event;
pub use worker::{DatabaseWriteWorker, JsonWriteWorker, Worker};

use tokio_util::sync::CancellationToken;

/// Run a processor until it completes or a termination signal arrives.
///
/// A signal cancels the run: both run loops are dropped, producer and worker
/// are closed and [`Error::Cancelled`] is returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use scap_feed::{Config, Cpe, JsonWriteWorker, NvdApiProducer, Processor, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let producer = NvdApiProducer::<Cpe, _>::from_config(&config)?;
///     let worker = JsonWriteWorker::new(config.json.clone());
///     let mut processor = Processor::<Cpe, _, _>::with_defaults(producer, worker);
///
///     // Run with automatic signal handling
///     if let Err(e) = run_with_shutdown(&mut processor).await {
///         eprintln!("{}", e);
///         std::process::exit(e.exit_code());
///     }
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown<T, P, W>(processor: &mut Processor<T, P, W>) -> Result<u64>
where
    T: Send,
    P: Producer<T>,
    W: Worker<T>,
{
    let token = CancellationToken::new();
    let trigger = token.clone();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    let result = processor.run_with_cancellation(token).await;
    signals.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
