use crate::core::cache::KeyValueCollection;
use crate::core::psd::{AttributeMap, Commodity, Country, MarketYear, PsdProvider, RecordValues};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const COMMODITIES_KEY: &[u8] = b"commodities";
const COUNTRIES_KEY: &[u8] = b"countries";
const ATTRIBUTES_KEY: &[u8] = b"commodityAttributes";

/// Read-through cache for the PSD reference lists.
///
/// Commodities, countries and the attribute map are kept for `ttl` (forever
/// when `None`) and dropped by `refresh`. Empty lists are not stored. Record
/// lookups always go to the inner provider.
pub struct CachingPsdProvider<T: PsdProvider> {
    inner: T,
    cache: Arc<dyn KeyValueCollection>,
    ttl: Option<Duration>,
}

impl<T: PsdProvider> CachingPsdProvider<T> {
    pub fn new(inner: T, cache: Arc<dyn KeyValueCollection>, ttl: Option<Duration>) -> Self {
        Self { inner, cache, ttl }
    }

    /// Drops every cached reference list.
    pub async fn refresh(&self) {
        self.cache.clear().await;
        info!("Cleared cached reference data");
    }

    async fn read_through<V, F, Fut>(&self, key: &[u8], is_empty: fn(&V) -> bool, fetch: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let name = String::from_utf8_lossy(key);
        if let Some(bytes) = self.cache.get(key).await {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!("Cache hit for reference data: {}", name);
                    return Ok(value);
                }
                Err(e) => debug!("Discarding unreadable cache entry {}: {}", name, e),
            }
        }

        debug!("Cache miss for reference data: {}", name);
        let value = fetch().await?;
        if is_empty(&value) {
            debug!("Not caching empty reference data: {}", name);
            return Ok(value);
        }
        match serde_json::to_vec(&value) {
            Ok(bytes) => self.cache.put(key, &bytes, self.ttl).await,
            Err(e) => debug!("Failed to encode reference data {}: {}", name, e),
        }
        Ok(value)
    }
}

#[async_trait]
impl<T: PsdProvider> PsdProvider for CachingPsdProvider<T> {
    async fn fetch_commodities(&self) -> Result<Vec<Commodity>> {
        self.read_through(COMMODITIES_KEY, Vec::is_empty, || self.inner.fetch_commodities())
            .await
    }

    async fn fetch_countries(&self) -> Result<Vec<Country>> {
        self.read_through(COUNTRIES_KEY, Vec::is_empty, || self.inner.fetch_countries())
            .await
    }

    async fn fetch_attribute_map(&self) -> Result<AttributeMap> {
        self.read_through(ATTRIBUTES_KEY, AttributeMap::is_empty, || {
            self.inner.fetch_attribute_map()
        })
        .await
    }

    async fn fetch_records(
        &self,
        commodity_code: &str,
        country_code: &str,
        year: MarketYear,
    ) -> Result<RecordValues> {
        self.inner
            .fetch_records(commodity_code, country_code, year)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct MockInnerProvider {
        commodity_calls: AtomicUsize,
        country_calls: AtomicUsize,
        attribute_calls: AtomicUsize,
        record_calls: AtomicUsize,
        empty: bool,
    }

    #[async_trait]
    impl<'a> PsdProvider for &'a MockInnerProvider {
        async fn fetch_commodities(&self) -> Result<Vec<Commodity>> {
            self.commodity_calls.fetch_add(1, Ordering::SeqCst);
            if self.empty {
                return Ok(Vec::new());
            }
            Ok(vec![Commodity {
                name: "Wheat".to_string(),
                code: "0410000".to_string(),
            }])
        }

        async fn fetch_countries(&self) -> Result<Vec<Country>> {
            self.country_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Country {
                name: "United States".to_string(),
                code: "US".to_string(),
            }])
        }

        async fn fetch_attribute_map(&self) -> Result<AttributeMap> {
            self.attribute_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![("Production".to_string(), 28)].into_iter().collect())
        }

        async fn fetch_records(
            &self,
            _commodity_code: &str,
            _country_code: &str,
            _year: MarketYear,
        ) -> Result<RecordValues> {
            self.record_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![(28, 10.0)].into_iter().collect())
        }
    }

    fn caching(inner: &MockInnerProvider, ttl: Option<Duration>) -> CachingPsdProvider<&MockInnerProvider> {
        CachingPsdProvider::new(inner, Arc::new(MemoryCollection::new()), ttl)
    }

    #[tokio::test]
    async fn test_reference_lists_are_cached() {
        let inner = MockInnerProvider::default();
        let provider = caching(&inner, None);

        // First calls hit the inner provider
        assert_eq!(provider.fetch_commodities().await.unwrap()[0].name, "Wheat");
        assert_eq!(provider.fetch_countries().await.unwrap()[0].code, "US");
        assert_eq!(provider.fetch_attribute_map().await.unwrap().id_of("Production"), Some(28));

        // Second calls are served from the cache
        assert_eq!(provider.fetch_commodities().await.unwrap().len(), 1);
        assert_eq!(provider.fetch_countries().await.unwrap().len(), 1);
        assert_eq!(provider.fetch_attribute_map().await.unwrap().len(), 1);

        assert_eq!(inner.commodity_calls.load(Ordering::SeqCst), 1);
        assert_eq!(inner.country_calls.load(Ordering::SeqCst), 1);
        assert_eq!(inner.attribute_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_records_are_not_cached() {
        let inner = MockInnerProvider::default();
        let provider = caching(&inner, None);

        for _ in 0..2 {
            let records = provider
                .fetch_records("0410000", "US", MarketYear::default())
                .await
                .unwrap();
            assert_eq!(records.get(28), Some(10.0));
        }
        assert_eq!(inner.record_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_lists_are_not_cached() {
        let inner = MockInnerProvider {
            empty: true,
            ..Default::default()
        };
        let provider = caching(&inner, None);

        assert!(provider.fetch_commodities().await.unwrap().is_empty());
        assert!(provider.fetch_commodities().await.unwrap().is_empty());
        assert_eq!(inner.commodity_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_forces_refetch() {
        let inner = MockInnerProvider::default();
        let provider = caching(&inner, None);

        provider.fetch_countries().await.unwrap();
        provider.refresh().await;
        provider.fetch_countries().await.unwrap();

        assert_eq!(inner.country_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let inner = MockInnerProvider::default();
        let provider = caching(&inner, Some(Duration::from_millis(10)));

        provider.fetch_attribute_map().await.unwrap();
        provider.fetch_attribute_map().await.unwrap();
        assert_eq!(inner.attribute_calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(20)).await;
        provider.fetch_attribute_map().await.unwrap();
        assert_eq!(inner.attribute_calls.load(Ordering::SeqCst), 2);
    }
}
