//! Paginated upstream sources
//!
//! [`PaginatedSource`] is the contract the API producer drives; [`NvdApi`] is
//! its implementation against the NVD 2.0 REST API.

use crate::error::FetchError;
use async_trait::async_trait;

mod client;

pub use crate::config::RequestFilter;
pub use client::NvdApi;

/// One page returned by a [`PaginatedSource`]
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    /// Items in upstream order
    pub items: Vec<T>,
    /// Whether the upstream reports items beyond this page
    pub has_more: bool,
}

/// A remote result set that can be sized and read page by page
///
/// Offsets are relative to the first item of the result set. Implementations
/// report retryable conditions with a transient [`FetchError`] and rejected
/// requests with [`FetchError::ClientRequest`].
#[async_trait]
pub trait PaginatedSource<T>: Send + Sync {
    /// Number of items available in the result set
    async fn count(&self) -> std::result::Result<u64, FetchError>;

    /// Fetch up to `limit` items starting at `offset`
    async fn page(&self, offset: u64, limit: u64) -> std::result::Result<Page<T>, FetchError>;
}
