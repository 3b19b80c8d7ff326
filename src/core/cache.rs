use crate::core::model::{Quote, Symbol};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct CachedQuote {
    quote: Quote,
    stored_at: Instant,
}

/// Last-known-good quotes keyed by symbol.
///
/// Entries are locked individually, so concurrent workers never contend on a
/// cache-wide lock. Entries older than the TTL are neither served nor kept.
pub struct QuoteCache {
    entries: DashMap<Symbol, CachedQuote>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Quote> {
        match self.entries.get(symbol) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                debug!("Cache HIT for {}", symbol);
                Some(entry.quote.clone())
            }
            Some(_) => {
                debug!("Cache entry expired for {}", symbol);
                None
            }
            None => {
                debug!("Cache MISS for {}", symbol);
                None
            }
        }
    }

    /// Stores `quote` unless the cache already holds a newer one for the
    /// symbol. Returns whether it was stored.
    pub fn put(&self, quote: Quote) -> bool {
        match self.entries.entry(quote.symbol.clone()) {
            Entry::Occupied(mut entry) => {
                if quote.timestamp < entry.get().quote.timestamp {
                    debug!(
                        "Ignoring out-of-order quote for {} ({} < {})",
                        quote.symbol,
                        quote.timestamp,
                        entry.get().quote.timestamp
                    );
                    return false;
                }
                entry.insert(CachedQuote {
                    quote,
                    stored_at: Instant::now(),
                });
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(CachedQuote {
                    quote,
                    stored_at: Instant::now(),
                });
                true
            }
        }
    }

    /// Evicts expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() <= self.ttl);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("Cache PURGE removed {} expired quotes", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Market;
    use chrono::{DateTime, TimeZone, Utc};

    fn quote(price: f64, timestamp: DateTime<Utc>) -> Quote {
        Quote {
            symbol: Symbol::new("600519", Market::Shanghai),
            last_price: price,
            previous_close: 100.0,
            timestamp,
            source: "sina".to_string(),
            stale: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_get_put() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        let symbol = Symbol::new("600519", Market::Shanghai);

        // Initially, cache is empty
        assert!(cache.get(&symbol).is_none());

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        cache.put(quote(101.0, ts));
        assert_eq!(cache.get(&symbol).unwrap().last_price, 101.0);

        // Get a non-existent key
        assert!(cache.get(&Symbol::new("00700", Market::HongKong)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_expiration() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        let symbol = Symbol::new("600519", Market::Shanghai);
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        cache.put(quote(101.0, ts));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(&symbol).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&symbol).is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_keeps_newer_quote() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        let symbol = Symbol::new("600519", Market::Shanghai);
        let newer = Utc.with_ymd_and_hms(2024, 1, 2, 2, 5, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();

        assert!(cache.put(quote(102.0, newer)));
        assert!(!cache.put(quote(99.0, older)));

        let held = cache.get(&symbol).unwrap();
        assert_eq!(held.last_price, 102.0);
        assert_eq!(held.timestamp, newer);
    }
}
