//! Batched quote fetching across an ordered provider chain.
//!
//! Symbols are split into batches that a fixed-size worker pool processes
//! concurrently. Within a batch every provider is tried in order and only the
//! symbols still unresolved move on to the next one, so a failure for one
//! symbol never blocks the others. Each provider call carries a timeout.
//!
//! Providers that fail are put aside for a while instead of being retried in
//! the same fetch: transient failures trigger exponential backoff, throttling
//! triggers a cool-down window. When every provider fails for a symbol, the
//! last-known-good quote from the cache is returned marked stale.

use crate::core::cache::QuoteCache;
use crate::core::config::QuotesConfig;
use crate::core::error::{Penalty, QuoteError};
use crate::core::model::{Market, Quote, Symbol};
use crate::core::quote::QuoteProvider;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

pub type QuoteResults = HashMap<Symbol, Result<Quote, QuoteError>>;

/// Tunables of the fetch path.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub request_timeout: Duration,
    pub workers: usize,
    pub batch_size: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&QuotesConfig::default())
    }
}

impl From<&QuotesConfig> for FetchPolicy {
    fn from(config: &QuotesConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

/// Availability bookkeeping for one provider.
#[derive(Debug, Default)]
struct ProviderHealth {
    state: Mutex<HealthState>,
}

impl ProviderHealth {
    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Provider health mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn is_available(&self) -> bool {
        match self.lock().blocked_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.blocked_until = None;
    }

    /// Applies `penalty` and returns how long the provider is now put aside.
    fn record_failure(&self, penalty: Penalty, policy: &FetchPolicy) -> Option<Duration> {
        let mut state = self.lock();
        let delay = match penalty {
            Penalty::None => return None,
            Penalty::Backoff => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let exponent = (state.consecutive_failures - 1).min(16);
                policy
                    .backoff_base
                    .saturating_mul(1u32 << exponent)
                    .min(policy.backoff_max)
            }
            Penalty::CoolDown(retry_after) => retry_after.unwrap_or(policy.rate_limit_cooldown),
        };
        state.blocked_until = Some(Instant::now() + delay);
        Some(delay)
    }
}

struct ProviderSlot {
    provider: Arc<dyn QuoteProvider>,
    health: ProviderHealth,
}

/// The quote source layer: provider failover, caching and bounded parallelism.
#[derive(Clone)]
pub struct QuoteSource {
    slots: Arc<Vec<ProviderSlot>>,
    cache: Arc<QuoteCache>,
    policy: FetchPolicy,
}

impl QuoteSource {
    /// `providers` are tried in the given order.
    pub fn new(
        providers: Vec<Arc<dyn QuoteProvider>>,
        cache: Arc<QuoteCache>,
        policy: FetchPolicy,
    ) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                health: ProviderHealth::default(),
            })
            .collect();
        Self {
            slots: Arc::new(slots),
            cache,
            policy,
        }
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    /// Whether the provider with `id` is currently eligible for calls.
    pub fn is_provider_available(&self, id: &str) -> bool {
        self.slots
            .iter()
            .find(|slot| slot.provider.id() == id)
            .is_some_and(|slot| slot.health.is_available())
    }

    /// Resolves every symbol to a quote or an error. Every symbol in the input
    /// has an entry in the output.
    pub async fn fetch(&self, symbols: &BTreeSet<Symbol>) -> QuoteResults {
        let mut results = QuoteResults::with_capacity(symbols.len());

        let (routable, unroutable): (Vec<Symbol>, Vec<Symbol>) = symbols
            .iter()
            .cloned()
            .partition(|symbol| symbol.market != Market::Other);
        for symbol in unroutable {
            debug!("No provider covers {}, skipping", symbol);
            let error = QuoteError::SymbolNotFound(symbol.to_string());
            results.insert(symbol, Err(error));
        }

        let batches: Vec<Vec<Symbol>> = routable
            .chunks(self.policy.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        if batches.is_empty() {
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(self.policy.workers));
        let (tx, mut rx) = mpsc::channel(batches.len());
        let batch_count = batches.len();

        for batch in batches {
            if semaphore.available_permits() == 0 {
                debug!("All {} quote workers busy, waiting", self.policy.workers);
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let source = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcomes = source.fetch_batch(batch).await;
                drop(permit);
                let _ = tx.send(outcomes).await;
            });
        }
        drop(tx);

        while let Some(outcomes) = rx.recv().await {
            results.extend(outcomes);
        }

        let failed = results.values().filter(|result| result.is_err()).count();
        info!(
            symbols = symbols.len(),
            batches = batch_count,
            failed,
            "Quote fetch complete"
        );
        results
    }

    async fn fetch_batch(&self, batch: Vec<Symbol>) -> Vec<(Symbol, Result<Quote, QuoteError>)> {
        let mut pending = batch;
        let mut resolved = Vec::with_capacity(pending.len());

        for slot in self.slots.iter() {
            if pending.is_empty() {
                break;
            }
            let provider_id = slot.provider.id();
            if !slot.health.is_available() {
                debug!(provider = %provider_id, "Provider backing off, skipping");
                continue;
            }

            let eligible: Vec<Symbol> = pending
                .iter()
                .filter(|symbol| slot.provider.supports(symbol.market))
                .cloned()
                .collect();
            if eligible.is_empty() {
                continue;
            }

            let outcome = match timeout(self.policy.request_timeout, slot.provider.fetch(&eligible))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(QuoteError::ProviderUnavailable {
                    provider: provider_id.to_string(),
                    message: format!("timed out after {:?}", self.policy.request_timeout),
                }),
            };

            match outcome {
                Ok(quotes) => {
                    slot.health.record_success();
                    for mut quote in quotes {
                        let Some(position) = pending.iter().position(|s| *s == quote.symbol)
                        else {
                            continue;
                        };
                        if !quote.is_valid() {
                            warn!(
                                provider = %provider_id,
                                symbol = %quote.symbol,
                                "Discarding quote with invalid prices"
                            );
                            continue;
                        }
                        let symbol = pending.remove(position);
                        quote.stale = false;
                        self.cache.put(quote.clone());
                        resolved.push((symbol, Ok(quote)));
                    }
                }
                Err(error) => {
                    if let Some(delay) = slot.health.record_failure(error.penalty(), &self.policy)
                    {
                        warn!(
                            provider = %provider_id,
                            error = %error,
                            "Provider failed, putting it aside for {:?}",
                            delay
                        );
                    } else {
                        debug!(provider = %provider_id, error = %error, "Provider failed");
                    }
                }
            }
        }

        for symbol in pending {
            match self.cache.get(&symbol) {
                Some(mut quote) => {
                    debug!("All providers failed for {}, serving cached quote", symbol);
                    quote.stale = true;
                    resolved.push((symbol, Ok(quote)));
                }
                None => {
                    let error = QuoteError::SymbolNotFound(symbol.to_string());
                    resolved.push((symbol, Err(error)));
                }
            }
        }
        resolved
    }
}
