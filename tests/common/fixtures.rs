//! NVD API fixtures served through wiremock

use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::{Request, Respond, ResponseTemplate};

/// CVE entry in the shape the NVD returns it
pub fn cve_json(n: usize) -> Value {
    json!({
        "id": format!("CVE-2024-{:05}", n),
        "sourceIdentifier": "cve@mitre.org",
        "published": "2024-02-01T08:15:00.000",
        "lastModified": format!("2024-03-{:02}T12:00:00.000", (n % 28) + 1),
        "vulnStatus": "Analyzed",
        "descriptions": [
            {"lang": "en", "value": format!("Buffer overflow in component {}", n)}
        ],
        "references": [
            {
                "url": format!("https://vendor.example/advisories/{}", n),
                "source": "cve@mitre.org",
                "tags": ["Vendor Advisory"]
            }
        ]
    })
}

/// CPE match string entry in the shape the NVD returns it
pub fn match_string_json(n: usize, matches: usize) -> Value {
    let matches: Vec<Value> = (0..matches)
        .map(|m| {
            let id = uuid::Uuid::from_u128((n * 1000 + m) as u128);
            json!({
                "cpeName": format!("cpe:2.3:a:acme:widget:{}.{}:*:*:*:*:*:*:*", n, m),
                "cpeNameId": id.to_string().to_uppercase()
            })
        })
        .collect();
    json!({
        "matchCriteriaId": uuid::Uuid::from_u128(n as u128).to_string().to_uppercase(),
        "criteria": "cpe:2.3:a:acme:widget:*:*:*:*:*:*:*:*",
        "versionEndExcluding": format!("{}.0", n + 1),
        "lastModified": "2024-01-10T09:00:00.000",
        "cpeLastModified": "2024-01-10T09:30:00.000",
        "created": "2023-12-01T00:00:00.000",
        "status": "Active",
        "matches": matches
    })
}

/// Responder paging through a fixed item list like the NVD does
///
/// Honours `startIndex` and `resultsPerPage`, answers the first `failures`
/// requests with `failure_status`, and counts every request it saw.
pub struct NvdFixture {
    collection_key: &'static str,
    item_key: &'static str,
    format: &'static str,
    items: Vec<Value>,
    failures: usize,
    failure_status: u16,
    requests: Arc<AtomicUsize>,
}

impl NvdFixture {
    pub fn cves(count: usize) -> Self {
        Self {
            collection_key: "vulnerabilities",
            item_key: "cve",
            format: "NVD_CVE",
            items: (1..=count).map(cve_json).collect(),
            failures: 0,
            failure_status: 503,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn match_strings(count: usize, matches: usize) -> Self {
        Self {
            collection_key: "matchStrings",
            item_key: "matchString",
            format: "NVD_CPEMatchString",
            items: (1..=count).map(|n| match_string_json(n, matches)).collect(),
            failures: 0,
            failure_status: 503,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `failures` requests with `status`
    pub fn failing_first(mut self, failures: usize, status: u16) -> Self {
        self.failures = failures;
        self.failure_status = status;
        self
    }

    /// Shared counter of requests answered so far
    pub fn request_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

fn query_u64(request: &Request, key: &str) -> Option<u64> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

impl Respond for NvdFixture {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let seen = self.requests.fetch_add(1, Ordering::SeqCst);
        if seen < self.failures {
            return ResponseTemplate::new(self.failure_status);
        }

        let start = query_u64(request, "startIndex").unwrap_or(0) as usize;
        let per_page = query_u64(request, "resultsPerPage").unwrap_or(2000) as usize;
        let page: Vec<Value> = self
            .items
            .iter()
            .skip(start)
            .take(per_page)
            .map(|item| {
                let mut entry = Map::new();
                entry.insert(self.item_key.to_string(), item.clone());
                Value::Object(entry)
            })
            .collect();

        let mut body = json!({
            "resultsPerPage": page.len(),
            "startIndex": start,
            "totalResults": self.items.len(),
            "format": self.format,
            "version": "2.0",
            "timestamp": "2024-03-01T10:00:00.000",
        });
        body[self.collection_key] = Value::Array(page);
        ResponseTemplate::new(200).set_body_json(body)
    }
}
