use super::util::{RetryPolicy, with_retry};
use crate::core::config::ApiConfig;
use crate::core::psd::{AttributeMap, Commodity, Country, MarketYear, PsdProvider, RecordValues};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
struct AttributeResponse {
    #[serde(rename = "attributeName")]
    attribute_name: Option<String>,
    #[serde(rename = "attributeId")]
    attribute_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    #[serde(rename = "attributeId")]
    attribute_id: Option<i64>,
    value: Option<f64>,
}

/// Client for the USDA FAS PSD API.
pub struct PsdApiProvider {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl PsdApiProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let mut key = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        let client = reqwest::Client::builder()
            .user_agent("psdcalc/1.0")
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(PsdApiProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let retry = RetryPolicy {
            retries: config.retries,
            ..RetryPolicy::default()
        };
        Self::new(&config.base_url, &api_key, config.timeout(), retry)
    }

    /// GETs `endpoint` and decodes the body. A failure status or a body
    /// that does not decode gives `None`. Transport errors, including a
    /// body that stops arriving, fail once the retries are used up.
    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("Requesting PSD data from {}", url);

        let (status, text) = with_retry(
            || async {
                let response = self.client.get(&url).send().await?;
                let status = response.status();
                let text = response.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            },
            self.retry,
        )
        .await
        .with_context(|| format!("Request failed: {url}"))?;

        if !status.is_success() {
            warn!(%status, %url, "PSD API returned an error status, treating as empty");
            return Ok(None);
        }

        match serde_json::from_str(&text) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(
                    error = ?e,
                    response = %text,
                    %url,
                    "Failed to parse PSD API response, treating as empty"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl PsdProvider for PsdApiProvider {
    #[instrument(name = "PsdCommodities", skip(self))]
    async fn fetch_commodities(&self) -> Result<Vec<Commodity>> {
        let commodities: Vec<Commodity> = self.get_json("/commodities").await?.unwrap_or_default();
        debug!(count = commodities.len(), "Fetched commodities");
        Ok(commodities)
    }

    #[instrument(name = "PsdCountries", skip(self))]
    async fn fetch_countries(&self) -> Result<Vec<Country>> {
        let countries: Vec<Country> = self.get_json("/countries").await?.unwrap_or_default();
        debug!(count = countries.len(), "Fetched countries");
        Ok(countries)
    }

    #[instrument(name = "PsdAttributes", skip(self))]
    async fn fetch_attribute_map(&self) -> Result<AttributeMap> {
        let attributes: Vec<AttributeResponse> = self
            .get_json("/commodityAttributes")
            .await?
            .unwrap_or_default();

        let map: AttributeMap = attributes
            .into_iter()
            .filter_map(|a| Some((a.attribute_name?, a.attribute_id?)))
            .collect();
        debug!(count = map.len(), "Fetched attribute map");
        Ok(map)
    }

    #[instrument(
        name = "PsdRecords",
        skip_all,
        fields(commodity = %commodity_code, country = %country_code, year = %year)
    )]
    async fn fetch_records(
        &self,
        commodity_code: &str,
        country_code: &str,
        year: MarketYear,
    ) -> Result<RecordValues> {
        let endpoint = format!("/commodity/{commodity_code}/country/{country_code}/year/{year}");
        let records: Vec<RecordResponse> = self.get_json(&endpoint).await?.unwrap_or_default();

        let values: RecordValues = records
            .into_iter()
            .filter_map(|r| Some((r.attribute_id?, r.value?)))
            .collect();
        debug!(count = values.len(), "Fetched record values");
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "test-key";

    async fn create_mock_server(endpoint: &str, body: &str, status_code: u16) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(endpoint))
            .and(header(API_KEY_HEADER, TEST_KEY))
            .respond_with(ResponseTemplate::new(status_code).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn provider(base_url: &str) -> PsdApiProvider {
        let retry = RetryPolicy {
            retries: 0,
            delay: Duration::from_millis(1),
        };
        PsdApiProvider::new(base_url, TEST_KEY, Duration::from_secs(5), retry).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_commodities() {
        let body = r#"[
            {"commodityCode": "0410000", "commodityName": "Wheat"},
            {"commodityCode": "0440000", "commodityName": "Corn"}
        ]"#;
        let mock_server = create_mock_server("/commodities", body, 200).await;

        let commodities = provider(&mock_server.uri()).fetch_commodities().await.unwrap();

        assert_eq!(commodities.len(), 2);
        assert_eq!(commodities[0].name, "Wheat");
        assert_eq!(commodities[1].code, "0440000");
    }

    #[tokio::test]
    async fn test_fetch_countries_sends_api_key() {
        let body = r#"[{"countryCode": "US", "countryName": "United States", "regionCode": "R00"}]"#;
        let mock_server = create_mock_server("/countries", body, 200).await;

        let countries = provider(&mock_server.uri()).fetch_countries().await.unwrap();
        assert_eq!(countries.len(), 1);
        assert_eq!(countries[0].code, "US");

        // A request with another key does not match the mock and gets a 404.
        let wrong_key = PsdApiProvider::new(
            &mock_server.uri(),
            "other-key",
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap();
        assert!(wrong_key.fetch_countries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_attribute_map_skips_incomplete_entries() {
        let body = r#"[
            {"attributeId": 20, "attributeName": "Beginning Stocks"},
            {"attributeId": 28, "attributeName": "Production"},
            {"attributeName": "No Id"},
            {"attributeId": 99}
        ]"#;
        let mock_server = create_mock_server("/commodityAttributes", body, 200).await;

        let map = provider(&mock_server.uri()).fetch_attribute_map().await.unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.id_of("Beginning Stocks"), Some(20));
        assert_eq!(map.id_of("Production"), Some(28));
        assert_eq!(map.id_of("No Id"), None);
    }

    #[tokio::test]
    async fn test_fetch_records() {
        let body = r#"[
            {"commodityCode": "0410000", "countryCode": "US", "marketYear": "2020",
             "calendarYear": "2024", "month": "10", "attributeId": 20, "unitId": 8, "value": 28000.5},
            {"attributeId": 28, "value": 49690},
            {"attributeId": 57, "value": null}
        ]"#;
        let mock_server =
            create_mock_server("/commodity/0410000/country/US/year/2020", body, 200).await;

        let records = provider(&mock_server.uri())
            .fetch_records("0410000", "US", MarketYear::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records.get(20), Some(28000.5));
        assert_eq!(records.get(28), Some(49690.0));
        assert_eq!(records.get(57), None);
    }

    #[tokio::test]
    async fn test_error_status_yields_empty() {
        let mock_server = create_mock_server("/commodities", "Server Error", 500).await;

        let commodities = provider(&mock_server.uri()).fetch_commodities().await.unwrap();
        assert!(commodities.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_yields_empty() {
        let mock_server =
            create_mock_server("/commodityAttributes", r#"{"message": "oops"}"#, 200).await;
        let map = provider(&mock_server.uri()).fetch_attribute_map().await.unwrap();
        assert!(map.is_empty());

        let mock_server =
            create_mock_server("/commodity/0440000/country/BR/year/2021", "not json", 200).await;
        let records = provider(&mock_server.uri())
            .fetch_records("0440000", "BR", MarketYear::try_from(2021).unwrap())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = provider(&format!("http://{addr}")).fetch_commodities().await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().starts_with("Request failed:"));
    }

    #[tokio::test]
    async fn test_stalled_body_is_retried_then_an_error() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends the headers and part of the body, then goes quiet.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n[{\"attributeId\": 20,",
                        )
                        .await;
                    tokio::time::sleep(Duration::from_secs(10)).await;
                });
            }
        });

        let retry = RetryPolicy {
            retries: 1,
            delay: Duration::from_millis(1),
        };
        let provider = PsdApiProvider::new(
            &format!("http://{addr}"),
            TEST_KEY,
            Duration::from_millis(500),
            retry,
        )
        .unwrap();

        let result = provider
            .fetch_records("0410000", "US", MarketYear::default())
            .await;

        let err = result.expect_err("A stalled body must not read as empty records");
        assert!(err.to_string().starts_with("Request failed:"));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = provider("http://example.com/api/psd/");
        assert_eq!(provider.base_url, "http://example.com/api/psd");
    }
}
