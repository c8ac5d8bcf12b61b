//! Key-value cache abstractions shared by the in-memory and on-disk stores

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A named collection of byte keys and values with optional expiry.
///
/// Lookups never fail: storage errors are logged and reported as misses.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>);
    async fn clear(&self);
}

pub trait Store: Send + Sync {
    /// Returns the collection called `name`. `persist` selects the on-disk
    /// backend; `None` when it is unavailable or the collection does not
    /// exist and `create_if_missing` is false.
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>>;
}
