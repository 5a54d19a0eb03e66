//! SCAP domain items
//!
//! Every item kind the pipeline moves implements [`ScapItem`], which carries the
//! per-kind constants the generic NVD client, JSON writer and log messages need.

use serde::Serialize;
use serde::de::DeserializeOwned;

mod cpe;
mod cpe_match;
mod cve;

pub use cpe::{Cpe, CpeNameParts, CpeReference, CpeTitle};
pub use cpe_match::{CpeMatch, CpeMatchString};
pub use cve::{Cve, CveDescription, CveReference};

/// An item kind that can flow from a producer through the queue to a worker
pub trait ScapItem: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    /// Plural name used in log messages (e.g. "CPE match strings")
    const TYPE_PLURAL: &'static str;

    /// NVD REST endpoint relative to the API root (e.g. "cpematch/2.0")
    const API_PATH: &'static str;

    /// Key of the item list in NVD responses and written documents
    const COLLECTION_KEY: &'static str;

    /// Key wrapping each single item inside the list
    const ITEM_KEY: &'static str;

    /// Value of the `format` field in written documents
    const DOCUMENT_FORMAT: &'static str;

    /// Default output file name without extension
    const FILE_STEM: &'static str;

    /// Default number of items per chunk for this kind
    const DEFAULT_CHUNK_SIZE: usize;

    /// Primary key of the item, used in log messages and error reports
    fn key(&self) -> String;
}

/// Serde helpers for NVD timestamps (`2024-01-31T12:00:00.000`, naive UTC)
///
/// A trailing `Z` is tolerated when reading.
pub mod nvd_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Format used when writing timestamps
    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

    /// Parse an NVD timestamp string
    pub fn parse(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        let trimmed = value.trim().trim_end_matches('Z');
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
    }

    /// Write a timestamp in [`FORMAT`]
    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    /// Read a timestamp with [`parse`]
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Optional variant
    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        /// Write a timestamp, or `null` when absent
        pub fn serialize<S>(
            value: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => serializer.collect_str(&v.format(super::FORMAT)),
                None => serializer.serialize_none(),
            }
        }

        /// Read an optional timestamp
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::nvd_timestamp;

    #[test]
    fn test_parse_nvd_timestamps() {
        let plain = nvd_timestamp::parse("2022-12-13T17:13:38.317");
        let zulu = nvd_timestamp::parse("2022-12-13T17:13:38.317Z");
        let no_fraction = nvd_timestamp::parse("2022-12-13T17:13:38");
        assert!(plain.is_ok());
        assert_eq!(plain.ok(), zulu.ok());
        assert!(no_fraction.is_ok());
        assert!(nvd_timestamp::parse("13.12.2022").is_err());
    }
}
