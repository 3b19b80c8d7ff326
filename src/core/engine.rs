//! One valuation pass over the whole fund universe.

use crate::core::error::{MetricsError, ValuationError};
use crate::core::metrics::{self, RiskMetrics};
use crate::core::model::{EstimatedValuation, Fund, Symbol};
use crate::core::quote_source::QuoteSource;
use crate::core::resolver::{HoldingsResolver, Resolution};
use crate::core::store::{HoldingsStore, NavStore};
use crate::core::valuation::Aggregator;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a completed tick.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Valuations produced and persisted, in fund order.
    pub valued: Vec<EstimatedValuation>,
    /// Funds omitted from this tick.
    pub failed: Vec<String>,
    /// Distinct symbols requested from the quote layer.
    pub symbols: usize,
    /// Symbols that resolved to neither a live nor a cached quote.
    pub missing: usize,
    /// Weight held in the ten largest positions of each valued fund.
    pub concentration: BTreeMap<String, f64>,
}

pub struct ValuationEngine {
    holdings: Arc<dyn HoldingsStore>,
    navs: Arc<dyn NavStore>,
    resolver: HoldingsResolver,
    quotes: QuoteSource,
    aggregator: Aggregator,
}

impl ValuationEngine {
    pub fn new(
        holdings: Arc<dyn HoldingsStore>,
        navs: Arc<dyn NavStore>,
        quotes: QuoteSource,
        aggregator: Aggregator,
        min_weight: f64,
    ) -> Self {
        Self {
            resolver: HoldingsResolver::new(Arc::clone(&holdings), min_weight),
            holdings,
            navs,
            quotes,
            aggregator,
        }
    }

    pub fn nav_store(&self) -> &Arc<dyn NavStore> {
        &self.navs
    }

    pub async fn funds(&self) -> Result<Vec<Fund>> {
        self.holdings.list_funds().await.context("Failed to list funds")
    }

    /// Values every fund once.
    ///
    /// Per-fund failures are logged and the fund is left out of the report.
    /// The tick itself fails only when the fund universe cannot be read or
    /// when no valuation could be persisted at all.
    #[instrument(name = "Tick", skip(self, now))]
    pub async fn run_tick(&self, now: DateTime<Utc>, as_of: NaiveDate) -> Result<TickReport> {
        let funds = self.funds().await?;
        let mut report = TickReport::default();

        let mut resolved: Vec<(Fund, Resolution)> = Vec::with_capacity(funds.len());
        for fund in funds {
            match self.resolver.resolve(&fund, as_of).await {
                Ok(resolution) => resolved.push((fund, resolution)),
                Err(e) => {
                    let e = match e {
                        e @ ValuationError::FundValuationFailed { .. } => e,
                        other => ValuationError::failed(&fund.code, other),
                    };
                    error!(fund = %fund.code, "{}", e);
                    report.failed.push(fund.code);
                }
            }
        }

        let symbols: BTreeSet<Symbol> = resolved
            .iter()
            .flat_map(|(_, r)| r.holdings.iter().map(|h| h.symbol.clone()))
            .collect();
        report.symbols = symbols.len();

        let purged = self.quotes.cache().purge_expired();
        if purged > 0 {
            debug!("Purged {} expired quote(s)", purged);
        }
        let quotes = self.quotes.fetch(&symbols).await;
        report.missing = quotes.values().filter(|q| q.is_err()).count();

        let mut persist_failures = 0;
        for (fund, resolution) in resolved {
            let last_nav = match self.navs.latest_nav(&fund.code).await {
                Ok(obs) => obs.map(|o| o.nav),
                Err(e) => {
                    warn!(fund = %fund.code, "Could not read last NAV: {:#}", e);
                    None
                }
            };
            let valuation = self.aggregator.aggregate(
                &fund.code,
                &resolution.holdings,
                &quotes,
                last_nav,
                now,
            );
            match self.navs.append_estimated_valuation(valuation.clone()).await {
                Ok(()) => {
                    report
                        .concentration
                        .insert(fund.code.clone(), resolution.concentration);
                    report.valued.push(valuation);
                }
                Err(e) => {
                    error!(
                        fund = %fund.code,
                        "{}",
                        ValuationError::failed(&fund.code, format!("persist failed: {e:#}"))
                    );
                    persist_failures += 1;
                    report.failed.push(fund.code);
                }
            }
        }

        if persist_failures > 0 && report.valued.is_empty() {
            bail!("Could not persist any of {} valuation(s)", persist_failures);
        }

        info!(
            valued = report.valued.len(),
            failed = report.failed.len(),
            symbols = report.symbols,
            missing = report.missing,
            "Tick complete"
        );
        Ok(report)
    }

    /// Metrics over the trailing `window` confirmed NAVs of one fund.
    pub async fn fund_metrics(
        &self,
        fund_code: &str,
        window: usize,
        risk_free_rate: f64,
    ) -> Result<Result<RiskMetrics, MetricsError>> {
        let series = self
            .navs
            .get_nav_series(fund_code, window)
            .await
            .with_context(|| format!("Failed to read NAV series of {fund_code}"))?;
        Ok(metrics::compute(
            metrics::trailing_window(&series, window),
            risk_free_rate,
        ))
    }
}
