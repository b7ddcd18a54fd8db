//! Combining a cache lookup with a network fetch.

use std::future::Future;

use campus_types::ReadingStrategy;
use serde_json::Value;

use crate::{CacheError, CacheLookup};

/// Where a resolved response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
    /// Stale entry used because the network call failed.
    EmergencyCache,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub data: Value,
    pub source: Source,
}

impl Resolved {
    fn cached(data: Value) -> Self {
        Self {
            data,
            source: Source::Cache,
        }
    }
}

/// Whether a failed fetch may be answered from cache.
pub trait CacheFallback {
    fn allows_cache_fallback(&self) -> bool;
}

/// Resolve a read according to `strategy`.
///
/// `lookup` must come from the cache unless the strategy is
/// [`ReadingStrategy::OnlyNetwork`], where it is ignored. `fetch` is only
/// awaited when the strategy calls for the network.
pub async fn resolve<F, Fut, E>(
    strategy: ReadingStrategy,
    lookup: CacheLookup,
    fetch: F,
) -> std::result::Result<Resolved, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Value, E>>,
    E: From<CacheError> + CacheFallback,
{
    match strategy {
        ReadingStrategy::OnlyNetwork => network(fetch).await,

        ReadingStrategy::OnlyCache => match lookup.into_entry() {
            Some(entry) => Ok(Resolved::cached(entry.data)),
            None => Err(CacheError::NotCached.into()),
        },

        ReadingStrategy::PreferCache => match lookup.into_entry() {
            Some(entry) => Ok(Resolved::cached(entry.data)),
            None => network(fetch).await,
        },

        ReadingStrategy::Default => match lookup {
            CacheLookup::Fresh(entry) => Ok(Resolved::cached(entry.data)),
            stale_or_absent => with_fallback(fetch, stale_or_absent).await,
        },

        ReadingStrategy::PreferNetwork => with_fallback(fetch, lookup).await,
    }
}

async fn network<F, Fut, E>(fetch: F) -> std::result::Result<Resolved, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Value, E>>,
{
    let data = fetch().await?;
    Ok(Resolved {
        data,
        source: Source::Network,
    })
}

async fn with_fallback<F, Fut, E>(fetch: F, lookup: CacheLookup) -> std::result::Result<Resolved, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Value, E>>,
    E: CacheFallback,
{
    match fetch().await {
        Ok(data) => Ok(Resolved {
            data,
            source: Source::Network,
        }),
        Err(err) if err.allows_cache_fallback() => match lookup.into_entry() {
            Some(entry) => {
                tracing::debug!(id = %entry.id, "Network failed, using cached response");
                Ok(Resolved {
                    data: entry.data,
                    source: Source::EmergencyCache,
                })
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheEntry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Offline,
        Denied,
        NotCached,
        Cache,
    }

    impl From<CacheError> for TestError {
        fn from(err: CacheError) -> Self {
            match err {
                CacheError::NotCached => TestError::NotCached,
                _ => TestError::Cache,
            }
        }
    }

    impl CacheFallback for TestError {
        fn allows_cache_fallback(&self) -> bool {
            *self == TestError::Offline
        }
    }

    fn entry(data: Value) -> CacheEntry {
        CacheEntry {
            id: "id".into(),
            data,
            key: None,
            expiration_time: 0,
            component: None,
            component_id: None,
        }
    }

    fn fresh() -> CacheLookup {
        CacheLookup::Fresh(entry(json!("cached")))
    }

    fn stale() -> CacheLookup {
        CacheLookup::Stale(entry(json!("stale")))
    }

    async fn run(
        strategy: ReadingStrategy,
        lookup: CacheLookup,
        reply: Result<Value, TestError>,
        calls: &AtomicUsize,
    ) -> Result<Resolved, TestError> {
        resolve(strategy, lookup, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            reply
        })
        .await
    }

    #[tokio::test]
    async fn test_only_cache_never_fetches() {
        let calls = AtomicUsize::new(0);
        let stale_hit = run(ReadingStrategy::OnlyCache, stale(), Ok(json!("net")), &calls)
            .await
            .expect("stale");
        assert_eq!(stale_hit, Resolved { data: json!("stale"), source: Source::Cache });

        let miss = run(ReadingStrategy::OnlyCache, CacheLookup::Absent, Ok(json!("net")), &calls).await;
        assert_eq!(miss, Err(TestError::NotCached));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_only_network_ignores_cache() {
        let calls = AtomicUsize::new(0);
        let result = run(ReadingStrategy::OnlyNetwork, fresh(), Err(TestError::Offline), &calls).await;
        assert_eq!(result, Err(TestError::Offline));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefer_cache() {
        let calls = AtomicUsize::new(0);
        let hit = run(ReadingStrategy::PreferCache, stale(), Ok(json!("net")), &calls)
            .await
            .expect("hit");
        assert_eq!(hit.source, Source::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let miss = run(ReadingStrategy::PreferCache, CacheLookup::Absent, Ok(json!("net")), &calls)
            .await
            .expect("miss");
        assert_eq!(miss.source, Source::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_strategy() {
        let calls = AtomicUsize::new(0);
        let hit = run(ReadingStrategy::Default, fresh(), Ok(json!("net")), &calls)
            .await
            .expect("fresh");
        assert_eq!(hit.data, json!("cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let refreshed = run(ReadingStrategy::Default, stale(), Ok(json!("net")), &calls)
            .await
            .expect("network");
        assert_eq!(refreshed.source, Source::Network);

        let emergency = run(ReadingStrategy::Default, stale(), Err(TestError::Offline), &calls)
            .await
            .expect("emergency");
        assert_eq!(emergency.source, Source::EmergencyCache);
        assert_eq!(emergency.data, json!("stale"));
    }

    #[tokio::test]
    async fn test_prefer_network_tries_network_first() {
        let calls = AtomicUsize::new(0);
        let result = run(ReadingStrategy::PreferNetwork, fresh(), Ok(json!("net")), &calls)
            .await
            .expect("network");
        assert_eq!(result.data, json!("net"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let fallback = run(ReadingStrategy::PreferNetwork, stale(), Err(TestError::Offline), &calls)
            .await
            .expect("fallback");
        assert_eq!(fallback.source, Source::EmergencyCache);
    }

    #[tokio::test]
    async fn test_non_fallback_errors_propagate() {
        let calls = AtomicUsize::new(0);
        let result = run(ReadingStrategy::PreferNetwork, stale(), Err(TestError::Denied), &calls).await;
        assert_eq!(result, Err(TestError::Denied));

        let result = run(ReadingStrategy::Default, CacheLookup::Absent, Err(TestError::Offline), &calls).await;
        assert_eq!(result, Err(TestError::Offline));
    }
}
