//! Consolidated JSON documents in the NVD response layout
//!
//! A [`JsonDocument`] collects items in arrival order and serialises them with
//! the same envelope the NVD API uses for a single page holding every item:
//!
//! ```json
//! {
//!   "resultsPerPage": 2,
//!   "startIndex": 0,
//!   "totalResults": 2,
//!   "format": "NVD_CVE",
//!   "version": "2.0",
//!   "timestamp": "2024-03-01T10:00:00.000",
//!   "vulnerabilities": [{"cve": {...}}, {"cve": {...}}]
//! }
//! ```

use crate::error::Result;
use crate::models::{ScapItem, nvd_timestamp};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

mod validate;

pub use validate::SchemaValidator;

/// Version reported in the document envelope
pub const DOCUMENT_VERSION: &str = "2.0";

/// In-memory accumulator for one output document
#[derive(Debug, Clone)]
pub struct JsonDocument<T> {
    items: Vec<T>,
}

impl<T> Default for JsonDocument<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: ScapItem> JsonDocument<T> {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of items, keeping their order
    pub fn append(&mut self, items: Vec<T>) {
        self.items.extend(items);
    }

    /// Number of collected items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no item was collected yet
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Collected items in arrival order
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Build the document envelope around the accumulated items
    pub fn to_value(&self) -> Result<Value> {
        let mut entries = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut entry = Map::with_capacity(1);
            entry.insert(T::ITEM_KEY.to_string(), serde_json::to_value(item)?);
            entries.push(Value::Object(entry));
        }

        let total = self.items.len() as u64;
        let mut document = Map::new();
        document.insert("resultsPerPage".to_string(), total.into());
        document.insert("startIndex".to_string(), 0u64.into());
        document.insert("totalResults".to_string(), total.into());
        document.insert("format".to_string(), T::DOCUMENT_FORMAT.into());
        document.insert("version".to_string(), DOCUMENT_VERSION.into());
        document.insert(
            "timestamp".to_string(),
            chrono::Utc::now()
                .naive_utc()
                .format(nvd_timestamp::FORMAT)
                .to_string()
                .into(),
        );
        document.insert(T::COLLECTION_KEY.to_string(), Value::Array(entries));

        Ok(Value::Object(document))
    }

    /// Serialise the complete document
    pub fn finalize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }
}

/// Output file name for item kind `T`
pub fn file_name<T: ScapItem>(compress: bool) -> String {
    if compress {
        format!("{}.json.gz", T::FILE_STEM)
    } else {
        format!("{}.json", T::FILE_STEM)
    }
}

/// Write serialised document bytes below `dir`, gzip compressed if requested
///
/// Returns the path of the written file. Missing directories are created.
pub async fn write_document<T: ScapItem>(
    dir: &Path,
    bytes: &[u8],
    compress: bool,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name::<T>(compress));

    if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;
        tokio::fs::write(&path, compressed).await?;
    } else {
        tokio::fs::write(&path, bytes).await?;
    }

    Ok(path)
}
