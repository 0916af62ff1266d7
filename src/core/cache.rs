//! TTL-bounded, request-coalescing cache of pair rates.

use crate::core::error::{LedgerError, Result};
use crate::core::rate::{PairKey, RateSource};
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// A priced rate for one pair. Replaced on refresh, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCacheEntry {
    pub pair: PairKey,
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RateCacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

type InFlightFetch = Shared<BoxFuture<'static, Result<RateCacheEntry>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<PairKey, RateCacheEntry>,
    in_flight: HashMap<PairKey, InFlightFetch>,
    /// Bumped by `invalidate_all`; fetches started under an older
    /// generation neither store their result nor touch the in-flight table.
    generation: u64,
}

#[derive(Clone)]
pub struct RateCache {
    source: Arc<dyn RateSource>,
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
    fetch_timeout: std::time::Duration,
}

impl RateCache {
    pub fn new(
        source: Arc<dyn RateSource>,
        ttl: std::time::Duration,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(CacheState::default())),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            fetch_timeout,
        }
    }

    /// Price of one unit of `from` expressed in `to`.
    pub async fn get(&self, from: &str, to: &str) -> Result<Decimal> {
        self.lookup(from, to).await.map(|entry| entry.rate)
    }

    /// Like [`get`](Self::get) but returns the whole entry, timestamps
    /// included.
    ///
    /// At most one fetch per pair is in flight; callers arriving while it runs
    /// wait on the same future and receive the same outcome.
    #[instrument(name = "RateLookup", skip(self), fields(pair = %format!("{from}/{to}")))]
    pub async fn lookup(&self, from: &str, to: &str) -> Result<RateCacheEntry> {
        let key = PairKey::new(from, to);
        let fetch = {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(Utc::now()) {
                    debug!("Cache HIT for pair: {}", key);
                    return Ok(entry.clone());
                }
                debug!("Cache entry expired for pair: {}", key);
            }

            match state.in_flight.get(&key) {
                Some(fetch) => {
                    debug!("Joining in-flight fetch for pair: {}", key);
                    fetch.clone()
                }
                None => {
                    debug!("Cache MISS for pair: {}", key);
                    let fetch = self.start_fetch(key.clone(), state.generation);
                    state.in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Fetches every pair that is not already cached.
    pub async fn warm(&self, pairs: &[(String, String)]) -> Vec<Result<RateCacheEntry>> {
        futures::future::join_all(pairs.iter().map(|(from, to)| self.lookup(from, to))).await
    }

    /// Drops every cached entry. Fetches already in flight still answer
    /// their waiters, but their results are not cached.
    pub async fn invalidate_all(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.entries.clear();
        state.in_flight.clear();
        debug!("Cache CLEAR (generation {})", state.generation);
    }

    /// Number of entries still fresh.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let state = self.state.lock().await;
        state.entries.values().filter(|e| e.is_fresh(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // The returned future owns everything it touches so it can be shared and
    // resumed by any waiter. It stores its own result and clears the in-flight
    // slot; failures are never stored.
    fn start_fetch(&self, key: PairKey, generation: u64) -> InFlightFetch {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let ttl = self.ttl;
        let timeout = self.fetch_timeout;

        async move {
            let result =
                match tokio::time::timeout(timeout, fetch_pair_rate(source.as_ref(), &key)).await {
                    Ok(result) => result,
                    Err(_) => Err(LedgerError::rate_unavailable(
                        &key.from,
                        &key.to,
                        format!("price fetch timed out after {timeout:?}"),
                    )),
                };

            let mut state = state.lock().await;
            let current = state.generation == generation;
            if current {
                state.in_flight.remove(&key);
            }
            match result {
                Ok(rate) => {
                    let fetched_at = Utc::now();
                    let entry = RateCacheEntry {
                        pair: key.clone(),
                        rate,
                        fetched_at,
                        expires_at: fetched_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
                    };
                    if current {
                        debug!("Cache PUT for pair: {} at {}", key, rate);
                        state.entries.insert(key, entry.clone());
                    } else {
                        debug!("Discarding stale fetch for pair: {}", key);
                    }
                    Ok(entry)
                }
                Err(e) => {
                    warn!(error = %e, "Rate fetch failed for pair: {}", key);
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Prices both legs in the feed's quote currency and divides. The quote
/// currency itself is priced at exactly one.
async fn fetch_pair_rate(source: &dyn RateSource, key: &PairKey) -> Result<Decimal> {
    let quote_currency = source.quote_currency().to_string();
    let symbols: HashSet<String> = [&key.from, &key.to]
        .into_iter()
        .filter(|s| **s != quote_currency)
        .cloned()
        .collect();

    let prices = if symbols.is_empty() {
        HashMap::new()
    } else {
        source
            .fetch_prices(&symbols)
            .await
            .map_err(|e| LedgerError::rate_unavailable(&key.from, &key.to, e.to_string()))?
    };

    let price_of = |symbol: &str| -> Result<Decimal> {
        if symbol == quote_currency {
            return Ok(Decimal::ONE);
        }
        prices
            .get(symbol)
            .and_then(|quote| quote.usable_price())
            .ok_or_else(|| {
                LedgerError::rate_unavailable(
                    &key.from,
                    &key.to,
                    format!("no usable {quote_currency} price for {symbol}"),
                )
            })
    };

    let from_price = price_of(&key.from)?;
    let to_price = price_of(&key.to)?;
    from_price
        .checked_div(to_price)
        .filter(|rate| !rate.is_zero())
        .ok_or_else(|| LedgerError::rate_unavailable(&key.from, &key.to, "rate out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate::PriceQuote;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct MockSource {
        prices: std::sync::Mutex<HashMap<String, Decimal>>,
        call_count: AtomicUsize,
        delay: StdDuration,
        fail: bool,
    }

    impl MockSource {
        fn new(prices: &[(&str, Decimal)]) -> Self {
            Self {
                prices: std::sync::Mutex::new(
                    prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                ),
                call_count: AtomicUsize::new(0),
                delay: StdDuration::ZERO,
                fail: false,
            }
        }

        fn with_delay(mut self, delay: StdDuration) -> Self {
            self.delay = delay;
            self
        }

        fn failing() -> Self {
            let mut source = Self::new(&[]);
            source.fail = true;
            source
        }

        fn set_price(&self, symbol: &str, price: Decimal) {
            self.prices.lock().unwrap().insert(symbol.to_string(), price);
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for MockSource {
        async fn fetch_prices(
            &self,
            symbols: &HashSet<String>,
        ) -> anyhow::Result<HashMap<String, PriceQuote>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(anyhow!("feed throttled"));
            }
            let prices = self.prices.lock().unwrap();
            Ok(symbols
                .iter()
                .filter_map(|s| prices.get(s).map(|p| (s.clone(), PriceQuote::from_usd(*p))))
                .collect())
        }
    }

    fn cache_with(source: Arc<MockSource>, ttl: StdDuration) -> RateCache {
        RateCache::new(source, ttl, StdDuration::from_secs(10))
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let source = Arc::new(MockSource::new(&[("BTC", dec!(42000))]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(42000));
        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(42000));
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_pairs_are_cached_independently() {
        let source = Arc::new(MockSource::new(&[("BTC", dec!(40000)), ("ETH", dec!(2000))]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        assert_eq!(cache.get("BTC", "ETH").await.unwrap(), dec!(20));
        assert_eq!(cache.get("ETH", "BTC").await.unwrap(), dec!(0.05));
        assert_eq!(cache.get("USD", "ETH").await.unwrap(), dec!(0.0005));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_lookups_share_one_fetch() {
        let source = Arc::new(
            MockSource::new(&[("BTC", dec!(42000))]).with_delay(StdDuration::from_millis(50)),
        );
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("BTC", "USD").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), dec!(42000));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_different_keys_fetch_independently() {
        let source = Arc::new(
            MockSource::new(&[("BTC", dec!(42000)), ("ETH", dec!(2500))])
                .with_delay(StdDuration::from_millis(20)),
        );
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let (btc, eth) = tokio::join!(cache.get("BTC", "USD"), cache.get("ETH", "USD"));
        assert_eq!(btc.unwrap(), dec!(42000));
        assert_eq!(eth.unwrap(), dec!(2500));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let source = Arc::new(MockSource::new(&[("BTC", dec!(42000))]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_millis(10));

        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(42000));
        source.set_price("BTC", dec!(43000));

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(43000));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let source = Arc::new(MockSource::new(&[]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let err = cache.get("BTC", "USD").await.unwrap_err();
        assert!(matches!(err, LedgerError::RateUnavailable { .. }));
        assert_eq!(cache.len().await, 0);

        source.set_price("BTC", dec!(42000));
        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(42000));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_source_error_maps_to_rate_unavailable() {
        let source = Arc::new(MockSource::failing());
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let err = cache.get("BTC", "USD").await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::rate_unavailable("BTC", "USD", "feed throttled")
        );
    }

    #[tokio::test]
    async fn test_zero_price_is_unusable() {
        let source = Arc::new(MockSource::new(&[("BTC", dec!(0))]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        assert!(matches!(
            cache.get("BTC", "USD").await,
            Err(LedgerError::RateUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let source = Arc::new(
            MockSource::new(&[("BTC", dec!(42000))]).with_delay(StdDuration::from_millis(200)),
        );
        let cache = RateCache::new(
            source,
            StdDuration::from_secs(300),
            StdDuration::from_millis(20),
        );

        let err = cache.get("BTC", "USD").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_all_discards_in_flight_result() {
        let source = Arc::new(
            MockSource::new(&[("BTC", dec!(42000))]).with_delay(StdDuration::from_millis(50)),
        );
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("BTC", "USD").await })
        };
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        cache.invalidate_all().await;

        assert_eq!(pending.await.unwrap().unwrap(), dec!(42000));
        assert!(cache.is_empty().await);

        source.set_price("BTC", dec!(43000));
        assert_eq!(cache.get("BTC", "USD").await.unwrap(), dec!(43000));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let source = Arc::new(MockSource::new(&[("BTC", dec!(42000)), ("ETH", dec!(2500))]));
        let cache = cache_with(Arc::clone(&source), StdDuration::from_secs(300));

        let warmed = cache
            .warm(&[
                ("BTC".to_string(), "USD".to_string()),
                ("ETH".to_string(), "USD".to_string()),
            ])
            .await;
        assert!(warmed.iter().all(|r| r.is_ok()));
        assert_eq!(cache.len().await, 2);

        cache.invalidate_all().await;
        assert!(cache.is_empty().await);

        cache.get("BTC", "USD").await.unwrap();
        assert_eq!(source.calls(), 3);
    }
}
