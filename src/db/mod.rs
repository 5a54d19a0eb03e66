//! Database layer for scap-feed
//!
//! Handles SQLite persistence for CPE match strings, CPEs and CVEs. The same
//! [`Database`] serves as a queryable source for the database producer and as a
//! batch sink for the database write worker.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`cpe_match`] - CPE match strings and their matched CPE names
//! - [`cpe`] - CPE dictionary entries with titles and references
//! - [`cve`] - CVE records with descriptions and references
//! - [`search`] - CPE name, version and keyword criteria for [`ItemFilter`]
//!
//! Producers and workers borrow a [`Database`] through clones of its pool
//! handle; whoever created it calls [`Database::close`] once it is no longer
//! needed.

use crate::error::DatabaseError;
use crate::models::ScapItem;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use sqlx::sqlite::SqlitePool;

mod cpe;
mod cpe_match;
mod cve;
mod migrations;
mod search;

pub use search::{CpeNameMatch, VersionBound, VersionRange, version_key};

/// Maximum number of parent rows whose children are loaded in one query
///
/// Keeps the `IN (...)` list below SQLite's default bind variable limit.
pub(crate) const STREAM_BATCH_SIZE: usize = 500;

/// What to do when an incoming item's primary key already exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Overwrite the stored row and replace its child rows
    Update,
    /// Keep the stored row untouched
    Skip,
}

impl ConflictPolicy {
    /// `Update` when `update` is set, otherwise `Skip`
    pub fn from_update_flag(update: bool) -> Self {
        if update {
            ConflictPolicy::Update
        } else {
            ConflictPolicy::Skip
        }
    }
}

/// Row selection for [`ItemStore::count`] and [`ItemStore::stream`]
///
/// For CVEs the creation bounds apply to the publication date. Search
/// criteria only apply to the item kind named in their docs and are ignored
/// by the others.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only items modified at or after this time
    pub last_modified_start: Option<NaiveDateTime>,
    /// Only items modified at or before this time
    pub last_modified_end: Option<NaiveDateTime>,
    /// Only items created at or after this time
    pub created_start: Option<NaiveDateTime>,
    /// Only items created at or before this time
    pub created_end: Option<NaiveDateTime>,
    /// Return at most this many items
    pub limit: Option<u64>,
    /// Skip this many items (ordered by primary key)
    pub offset: u64,
    /// CPEs: name pattern the CPE has to match
    pub cpe: Option<CpeNameMatch>,
    /// CPEs: version interval the CPE's version has to fall into
    pub versions: Option<VersionRange>,
    /// CPEs: only deprecated (`true`) or only current (`false`) entries
    pub deprecated: Option<bool>,
    /// CVEs: every keyword has to start a word in one of the descriptions
    pub keywords: Vec<String>,
    /// CVEs: only records from this source
    pub source_identifier: Option<String>,
    /// CVEs: leave out records with status `Rejected`
    pub exclude_rejected: bool,
}

impl ItemFilter {
    /// Limit as bound into SQL, where -1 means unbounded
    pub(crate) fn sql_limit(&self) -> i64 {
        self.limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
            .unwrap_or(-1)
    }

    /// Offset as bound into SQL
    pub(crate) fn sql_offset(&self) -> i64 {
        i64::try_from(self.offset).unwrap_or(i64::MAX)
    }
}

/// Storage for one item kind
///
/// Implemented by [`Database`] for every [`ScapItem`](crate::models::ScapItem).
#[async_trait]
pub trait ItemStore<T>: Send + Sync {
    /// Write a batch of items in one transaction
    ///
    /// Parent and child rows commit together; on error nothing of the batch is
    /// visible. Returns the number of parent rows inserted or updated.
    async fn upsert(&self, items: &[T], policy: ConflictPolicy) -> Result<u64>;

    /// Number of items matching `filter`
    async fn count(&self, filter: &ItemFilter) -> Result<u64>;

    /// Lazily stream items matching `filter`, ordered by primary key
    ///
    /// Rows are fetched incrementally; the stream is finite and not restartable.
    ///
    /// Invalid search criteria surface as the stream's first item.
    fn stream<'a>(&'a self, filter: &ItemFilter) -> BoxStream<'a, Result<T>>;
}

/// Database handle for scap-feed
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Name the item a write failure happened on
pub(crate) fn tag_item<T: ScapItem>(error: Error, item: &T) -> Error {
    match error {
        Error::Database(DatabaseError::WriteFailed { table, reason }) => {
            Error::Database(DatabaseError::WriteFailed {
                table,
                reason: format!("{}: {}", item.key(), reason),
            })
        }
        other => other,
    }
}

/// Convert a stored count into the unsigned width used across the pipeline
pub(crate) fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
