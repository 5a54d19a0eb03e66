//! NVD 2.0 REST API client

use super::{Page, PaginatedSource};
use crate::config::{NvdApiConfig, RequestFilter};
use crate::error::{Error, FetchError, Result};
use crate::models::{ScapItem, nvd_timestamp};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Upper bound the NVD accepts for `resultsPerPage`
pub const MAX_RESULTS_PER_PAGE: u64 = 2000;

/// Client for one NVD endpoint, typed by the item kind it returns
pub struct NvdApi<T> {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    filter: RequestFilter,
    start_index: u64,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    _item: PhantomData<fn() -> T>,
}

impl<T: ScapItem> NvdApi<T> {
    /// Build a client for `T::API_PATH` below the configured API root
    pub fn new(config: &NvdApiConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(T::API_PATH)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("scap-feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            filter: config.filter.clone(),
            start_index: config.start_index,
            request_interval: config.effective_request_interval(),
            last_request: Mutex::new(None),
            _item: PhantomData,
        })
    }

    /// Endpoint URL requests are sent to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn query_params(
        &self,
        start_index: u64,
        results_per_page: u64,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("startIndex", start_index.to_string()),
            ("resultsPerPage", results_per_page.to_string()),
        ];

        // The NVD rejects a lone start date, so pair it with "now"
        if let Some(start) = self.filter.last_modified_start {
            let end = self
                .filter
                .last_modified_end
                .unwrap_or_else(|| chrono::Utc::now().naive_utc());
            params.push((
                "lastModStartDate",
                start.format(nvd_timestamp::FORMAT).to_string(),
            ));
            params.push((
                "lastModEndDate",
                end.format(nvd_timestamp::FORMAT).to_string(),
            ));
        }
        if let Some(keyword) = &self.filter.keyword_search {
            params.push(("keywordSearch", keyword.clone()));
        }
        if let Some(cve_id) = &self.filter.cve_id {
            params.push(("cveId", cve_id.clone()));
        }
        if let Some(cpe) = &self.filter.match_string_search {
            params.push(("matchStringSearch", cpe.clone()));
        }
        params
    }

    /// Wait until the configured interval since the previous request has passed
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_interval {
                tokio::time::sleep(self.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Issue one request and return `totalResults` with the decoded items
    async fn request(
        &self,
        start_index: u64,
        results_per_page: u64,
    ) -> std::result::Result<(u64, Vec<T>), FetchError> {
        self.pace().await;

        let params = self.query_params(start_index, results_per_page);
        tracing::debug!(
            endpoint = %self.endpoint,
            start_index,
            results_per_page,
            "requesting {}",
            T::TYPE_PLURAL
        );

        let mut request = self.client.get(self.endpoint.clone()).query(&params);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_client_error() {
            // The NVD reports the reason in a `message` header
            let header_message = response
                .headers()
                .get("message")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let message = match header_message {
                Some(message) => message,
                None => response.text().await.unwrap_or_default(),
            };
            return Err(FetchError::ClientRequest {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(FetchError::ServerStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        decode_response::<T>(&body)
    }
}

/// Decode an NVD response body into `totalResults` and the wrapped items
pub(crate) fn decode_response<T: ScapItem>(
    body: &[u8],
) -> std::result::Result<(u64, Vec<T>), FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    let total = value
        .get("totalResults")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| FetchError::Decode("missing totalResults".to_string()))?;

    let entries = match value.get(T::COLLECTION_KEY) {
        Some(serde_json::Value::Array(entries)) => entries.as_slice(),
        Some(_) => {
            return Err(FetchError::Decode(format!(
                "{} is not an array",
                T::COLLECTION_KEY
            )));
        }
        None => &[],
    };

    let items = entries
        .iter()
        .map(|entry| {
            let inner = entry.get(T::ITEM_KEY).ok_or_else(|| {
                FetchError::Decode(format!("entry without {} field", T::ITEM_KEY))
            })?;
            T::deserialize(inner).map_err(|e| FetchError::Decode(e.to_string()))
        })
        .collect::<std::result::Result<Vec<T>, FetchError>>()?;

    Ok((total, items))
}

#[async_trait]
impl<T: ScapItem> PaginatedSource<T> for NvdApi<T> {
    async fn count(&self) -> std::result::Result<u64, FetchError> {
        let (total, _) = self.request(self.start_index, 1).await?;
        Ok(total.saturating_sub(self.start_index))
    }

    async fn page(&self, offset: u64, limit: u64) -> std::result::Result<Page<T>, FetchError> {
        let start = self.start_index + offset;
        let per_page = limit.clamp(1, MAX_RESULTS_PER_PAGE);
        let (total, items) = self.request(start, per_page).await?;
        let has_more = start + (items.len() as u64) < total;
        Ok(Page { items, has_more })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cve;

    fn config() -> NvdApiConfig {
        NvdApiConfig {
            base_url: "http://localhost:1/rest/json".to_string(),
            request_interval: Some(Duration::ZERO),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_joins_api_path() {
        let api = NvdApi::<Cve>::new(&config()).unwrap();
        assert_eq!(api.endpoint().as_str(), "http://localhost:1/rest/json/cves/2.0");
    }

    #[test]
    fn test_query_pairs_lone_start_date_with_end() {
        let mut config = config();
        config.filter.last_modified_start =
            Some(nvd_timestamp::parse("2024-01-01T00:00:00.000").unwrap());
        config.filter.keyword_search = Some("openssl".to_string());
        let api = NvdApi::<Cve>::new(&config).unwrap();

        let params = api.query_params(40, 20);
        let keys: Vec<_> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "startIndex",
                "resultsPerPage",
                "lastModStartDate",
                "lastModEndDate",
                "keywordSearch"
            ]
        );
        assert_eq!(params[0].1, "40");
        assert_eq!(params[2].1, "2024-01-01T00:00:00.000");
    }

    #[test]
    fn test_decode_response() {
        let body = br#"{
            "resultsPerPage": 1,
            "startIndex": 0,
            "totalResults": 7,
            "format": "NVD_CVE",
            "version": "2.0",
            "timestamp": "2024-03-01T10:00:00.000",
            "vulnerabilities": [
                {"cve": {
                    "id": "CVE-2024-0001",
                    "sourceIdentifier": "cve@mitre.org",
                    "published": "2024-01-01T00:00:00.000",
                    "lastModified": "2024-01-02T00:00:00.000",
                    "vulnStatus": "Analyzed",
                    "descriptions": [{"lang": "en", "value": "Example"}]
                }}
            ]
        }"#;
        let (total, items) = decode_response::<Cve>(body).unwrap();
        assert_eq!(total, 7);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "CVE-2024-0001");
    }

    #[test]
    fn test_decode_errors_are_transient() {
        let not_json = decode_response::<Cve>(b"<html>").unwrap_err();
        assert!(matches!(not_json, FetchError::Decode(_)));
        assert!(not_json.is_transient());

        let missing_total = decode_response::<Cve>(br#"{"vulnerabilities": []}"#).unwrap_err();
        assert!(matches!(missing_total, FetchError::Decode(_)));

        let bad_entry =
            decode_response::<Cve>(br#"{"totalResults": 1, "vulnerabilities": [{"cve": {}}]}"#)
                .unwrap_err();
        assert!(matches!(bad_entry, FetchError::Decode(_)));
    }

    #[test]
    fn test_decode_empty_result_set() {
        let (total, items) = decode_response::<Cve>(br#"{"totalResults": 0}"#).unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }
}
