use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ScapItem, nvd_timestamp};

/// A CPE match string and the CPE names it currently matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpeMatchString {
    /// Unique identifier of the match criteria
    pub match_criteria_id: Uuid,
    /// CPE 2.3 match criteria
    pub criteria: String,
    /// "Active" or "Inactive"
    pub status: String,
    /// Last time the list of matched CPEs changed
    #[serde(
        default,
        with = "nvd_timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cpe_last_modified: Option<NaiveDateTime>,
    /// Creation time
    #[serde(with = "nvd_timestamp")]
    pub created: NaiveDateTime,
    /// Last modification time
    #[serde(with = "nvd_timestamp")]
    pub last_modified: NaiveDateTime,
    /// Lowest matched version, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_including: Option<String>,
    /// Lowest matched version, exclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_excluding: Option<String>,
    /// Highest matched version, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_including: Option<String>,
    /// Highest matched version, exclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_excluding: Option<String>,
    /// CPE names matched by the criteria
    #[serde(default)]
    pub matches: Vec<CpeMatch>,
}

/// A single CPE name matched by a [`CpeMatchString`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpeMatch {
    /// CPE 2.3 formatted name
    pub cpe_name: String,
    /// Identifier of the CPE name
    pub cpe_name_id: Uuid,
}

impl ScapItem for CpeMatchString {
    const TYPE_PLURAL: &'static str = "CPE match strings";
    const API_PATH: &'static str = "cpematch/2.0";
    const COLLECTION_KEY: &'static str = "matchStrings";
    const ITEM_KEY: &'static str = "matchString";
    const DOCUMENT_FORMAT: &'static str = "NVD_CPEMatchString";
    const FILE_STEM: &'static str = "nvd-cpe-matches";
    const DEFAULT_CHUNK_SIZE: usize = 500;

    fn key(&self) -> String {
        self.match_criteria_id.to_string()
    }
}
