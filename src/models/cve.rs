use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{ScapItem, nvd_timestamp};

/// A CVE record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cve {
    /// CVE identifier, e.g. "CVE-2024-1234"
    pub id: String,
    /// Organisation that assigned the CVE
    #[serde(default)]
    pub source_identifier: String,
    /// Publication time
    #[serde(with = "nvd_timestamp")]
    pub published: NaiveDateTime,
    /// Last modification time
    #[serde(with = "nvd_timestamp")]
    pub last_modified: NaiveDateTime,
    /// NVD analysis status, e.g. "Analyzed" or "Rejected"
    #[serde(default)]
    pub vuln_status: String,
    /// Descriptions in several languages
    #[serde(default)]
    pub descriptions: Vec<CveDescription>,
    /// Advisories, patches and other links
    #[serde(default)]
    pub references: Vec<CveReference>,
}

/// Description text of a [`Cve`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveDescription {
    /// Language code
    pub lang: String,
    /// Description text
    pub value: String,
}

/// External link of a [`Cve`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveReference {
    /// Target URL
    pub url: String,
    /// Who supplied the link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Kind of resource, e.g. "Patch"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ScapItem for Cve {
    const TYPE_PLURAL: &'static str = "CVEs";
    const API_PATH: &'static str = "cves/2.0";
    const COLLECTION_KEY: &'static str = "vulnerabilities";
    const ITEM_KEY: &'static str = "cve";
    const DOCUMENT_FORMAT: &'static str = "NVD_CVE";
    const FILE_STEM: &'static str = "nvd-cves";
    const DEFAULT_CHUNK_SIZE: usize = 500;

    fn key(&self) -> String {
        self.id.clone()
    }
}
