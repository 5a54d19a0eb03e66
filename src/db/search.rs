//! Search criteria for stored CPEs and CVEs.
//!
//! CPE names are matched component by component against `cpe_name_parts`,
//! versions are compared through a sortable key derived from their numeric
//! release segments.

use crate::models::CpeNameParts;
use crate::{Error, Result};

use super::ItemFilter;

/// Width every numeric version segment is padded to in a version key
const SEGMENT_WIDTH: usize = 20;

/// Match stored CPE names against a CPE 2.3 pattern
///
/// Without `exact`, a `*` component in the pattern matches any stored value.
/// With `exact`, every component has to be equal, `*` included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpeNameMatch {
    /// CPE 2.3 formatted string name used as pattern
    pub name: String,
    /// Compare all components literally
    pub exact: bool,
}

impl CpeNameMatch {
    /// Pattern treating `*` components as wildcards
    pub fn pattern(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exact: false,
        }
    }

    /// Pattern that must equal the stored name component by component
    pub fn exact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exact: true,
        }
    }

    /// Per-component values to compare, `None` where anything matches
    fn bindings(&self) -> Result<[Option<String>; 11]> {
        let parts = CpeNameParts::parse(&self.name).ok_or_else(|| Error::Config {
            message: format!("'{}' is not a CPE 2.3 formatted string", self.name),
            key: Some("cpe".to_string()),
        })?;

        Ok(parts.components().clone().map(|value| {
            if !self.exact && value == CpeNameParts::ANY {
                None
            } else {
                Some(value)
            }
        }))
    }
}

/// One end of a [`VersionRange`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionBound {
    /// The bound itself is part of the range
    Including(String),
    /// The bound itself is outside the range
    Excluding(String),
}

impl VersionBound {
    fn version(&self) -> &str {
        match self {
            VersionBound::Including(v) | VersionBound::Excluding(v) => v,
        }
    }
}

/// Version interval for CPE searches
///
/// Only CPEs whose version has a numeric release part can fall inside a range;
/// `*` and `-` versions never do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionRange {
    /// Lower bound
    pub start: Option<VersionBound>,
    /// Upper bound
    pub end: Option<VersionBound>,
}

impl VersionRange {
    /// Version keys in the order `>`, `>=`, `<`, `<=`
    fn bindings(&self) -> Result<[Option<String>; 4]> {
        let mut keys: [Option<String>; 4] = Default::default();
        for (bound, excluding, including) in [(&self.start, 0, 1), (&self.end, 2, 3)] {
            let Some(bound) = bound else { continue };
            let key = version_key(bound.version()).ok_or_else(|| Error::Config {
                message: format!("'{}' is not a comparable version", bound.version()),
                key: Some("version".to_string()),
            })?;
            match bound {
                VersionBound::Excluding(_) => keys[excluding] = Some(key),
                VersionBound::Including(_) => keys[including] = Some(key),
            }
        }
        Ok(keys)
    }
}

/// Sortable key of a version's numeric release segments
///
/// `2.10.1rc1` becomes the padded form of `2.10.1`. Trailing zero segments
/// are dropped so `1.0` and `1` compare equal. Versions that do not start
/// with a digit have no key.
pub fn version_key(version: &str) -> Option<String> {
    let release: String = version
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let release = release.trim_end_matches('.');
    if release.is_empty() {
        return None;
    }

    let mut segments = release
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;
    while segments.len() > 1 && segments.last() == Some(&0) {
        segments.pop();
    }

    Some(
        segments
            .iter()
            .map(|segment| format!("{:0width$}", segment, width = SEGMENT_WIDTH))
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// Bind values of the CPE search clauses, in statement order
pub(crate) fn cpe_search_bindings(filter: &ItemFilter) -> Result<Vec<Option<String>>> {
    let components = match &filter.cpe {
        Some(pattern) => pattern.bindings()?,
        None => Default::default(),
    };
    let versions = match &filter.versions {
        Some(range) => range.bindings()?,
        None => Default::default(),
    };
    Ok(components.into_iter().chain(versions).collect())
}

/// Keywords as a JSON array of escaped `LIKE` fragments
pub(crate) fn keyword_patterns(keywords: &[String]) -> Result<String> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(|keyword| {
            keyword
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        })
        .collect();
    Ok(serde_json::to_string(&escaped)?)
}
