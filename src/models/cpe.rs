use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ScapItem, nvd_timestamp};

/// A CPE product entry from the NVD CPE dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpe {
    /// CPE 2.3 formatted name
    pub cpe_name: String,
    /// Unique identifier of the CPE name
    pub cpe_name_id: Uuid,
    /// Whether the entry has been deprecated
    #[serde(default)]
    pub deprecated: bool,
    /// Creation time
    #[serde(with = "nvd_timestamp")]
    pub created: NaiveDateTime,
    /// Last modification time
    #[serde(with = "nvd_timestamp")]
    pub last_modified: NaiveDateTime,
    /// Human readable titles
    #[serde(default)]
    pub titles: Vec<CpeTitle>,
    /// External references
    #[serde(default)]
    pub refs: Vec<CpeReference>,
}

/// Human readable title of a [`Cpe`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpeTitle {
    /// Title text
    pub title: String,
    /// Language code
    pub lang: String,
}

/// External link of a [`Cpe`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpeReference {
    /// Target URL
    #[serde(rename = "ref")]
    pub url: String,
    /// Kind of resource, e.g. "Vendor" or "Change Log"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ref_type: Option<String>,
}

/// Components of a CPE 2.3 formatted string name
///
/// Values are kept in their escaped form, so `ANY` stays `*` and `NA` stays `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpeNameParts {
    components: [String; 11],
}

impl CpeNameParts {
    /// Logical value matching any component value
    pub const ANY: &'static str = "*";
    /// Logical value for "not applicable"
    pub const NA: &'static str = "-";

    /// Split `cpe:2.3:part:vendor:...:other` on its unescaped colons
    ///
    /// Returns `None` unless the name has the prefix and exactly 11 components.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("cpe:2.3:")?;

        let mut components = Vec::with_capacity(11);
        let mut current = String::new();
        let mut escaped = false;
        for c in rest.chars() {
            if escaped {
                current.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    current.push(c);
                    escaped = true;
                }
                ':' => components.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        components.push(current);

        let components: [String; 11] = components.try_into().ok()?;
        if components.iter().any(String::is_empty) {
            return None;
        }
        Some(Self { components })
    }

    /// All components in name order, starting with the part
    pub fn components(&self) -> &[String; 11] {
        &self.components
    }

    /// `a`, `o` or `h`
    pub fn part(&self) -> &str {
        &self.components[0]
    }

    /// Vendor component
    pub fn vendor(&self) -> &str {
        &self.components[1]
    }

    /// Product component
    pub fn product(&self) -> &str {
        &self.components[2]
    }

    /// Version component
    pub fn version(&self) -> &str {
        &self.components[3]
    }
}

impl ScapItem for Cpe {
    const TYPE_PLURAL: &'static str = "CPEs";
    const API_PATH: &'static str = "cpes/2.0";
    const COLLECTION_KEY: &'static str = "products";
    const ITEM_KEY: &'static str = "cpe";
    const DOCUMENT_FORMAT: &'static str = "NVD_CPE";
    const FILE_STEM: &'static str = "nvd-cpes";
    const DEFAULT_CHUNK_SIZE: usize = 1000;

    fn key(&self) -> String {
        self.cpe_name_id.to_string()
    }
}
