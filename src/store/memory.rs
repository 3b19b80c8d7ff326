use crate::core::config::FundConfig;
use crate::core::model::{EstimatedValuation, Fund, Holding, NavObservation};
use crate::core::resolver::infer_fund_kind;
use crate::core::store::{HoldingsStore, NavStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory implementation of both stores.
///
/// Holdings are seeded at construction and never change. NAV history and
/// estimates live only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    funds: Vec<Fund>,
    holdings: HashMap<String, Vec<Holding>>,
    navs: RwLock<HashMap<String, BTreeMap<NaiveDate, NavObservation>>>,
    estimates: RwLock<HashMap<String, Vec<EstimatedValuation>>>,
}

impl MemoryStore {
    pub fn new(funds: Vec<Fund>, holdings: Vec<Holding>) -> Self {
        let mut by_fund: HashMap<String, Vec<Holding>> = HashMap::new();
        for holding in holdings {
            by_fund
                .entry(holding.fund_code.clone())
                .or_default()
                .push(holding);
        }
        Self {
            funds,
            holdings: by_fund,
            ..Default::default()
        }
    }

    /// Seeds funds and holdings from the configuration file. Funds without an
    /// explicit kind get one inferred from their name.
    pub fn from_fund_configs(configs: &[FundConfig]) -> Self {
        let mut funds = Vec::with_capacity(configs.len());
        let mut holdings = Vec::new();
        for config in configs {
            let kind = config
                .kind
                .unwrap_or_else(|| infer_fund_kind(&config.name));
            funds.push(Fund {
                code: config.code.clone(),
                name: config.name.clone(),
                kind,
            });
            holdings.extend(config.holdings.iter().map(|h| Holding {
                fund_code: config.code.clone(),
                symbol: h.symbol.clone(),
                market: h.market,
                weight: h.weight,
                as_of: h.as_of,
            }));
        }
        Self::new(funds, holdings)
    }
}

#[async_trait]
impl HoldingsStore for MemoryStore {
    async fn list_funds(&self) -> Result<Vec<Fund>> {
        Ok(self.funds.clone())
    }

    async fn get_holdings(&self, fund_code: &str, date: NaiveDate) -> Result<Vec<Holding>> {
        let Some(all) = self.holdings.get(fund_code) else {
            return Ok(Vec::new());
        };
        let Some(snapshot) = all.iter().map(|h| h.as_of).filter(|d| *d <= date).max() else {
            return Ok(Vec::new());
        };
        debug!(fund = %fund_code, %snapshot, "Using holdings snapshot");
        Ok(all.iter().filter(|h| h.as_of == snapshot).cloned().collect())
    }
}

#[async_trait]
impl NavStore for MemoryStore {
    async fn get_nav_series(&self, fund_code: &str, window: usize) -> Result<Vec<NavObservation>> {
        let navs = self.navs.read().await;
        let Some(series) = navs.get(fund_code) else {
            return Ok(Vec::new());
        };
        let mut tail: Vec<NavObservation> = series.values().rev().take(window).cloned().collect();
        tail.reverse();
        Ok(tail)
    }

    async fn latest_nav(&self, fund_code: &str) -> Result<Option<NavObservation>> {
        let navs = self.navs.read().await;
        Ok(navs
            .get(fund_code)
            .and_then(|series| series.values().next_back().cloned()))
    }

    async fn append_nav(&self, observation: NavObservation) -> Result<bool> {
        let mut navs = self.navs.write().await;
        let series = navs.entry(observation.fund_code.clone()).or_default();
        if series.contains_key(&observation.date) {
            return Ok(false);
        }
        series.insert(observation.date, observation);
        Ok(true)
    }

    async fn append_estimated_valuation(&self, valuation: EstimatedValuation) -> Result<()> {
        let mut estimates = self.estimates.write().await;
        let records = estimates.entry(valuation.fund_code.clone()).or_default();
        let position = records.partition_point(|v| v.timestamp <= valuation.timestamp);
        records.insert(position, valuation);
        Ok(())
    }

    async fn estimated_valuations(
        &self,
        fund_code: &str,
        date: NaiveDate,
    ) -> Result<Vec<EstimatedValuation>> {
        let estimates = self.estimates.read().await;
        Ok(estimates
            .get(fund_code)
            .map(|records| {
                records
                    .iter()
                    .filter(|v| v.timestamp.date_naive() == date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_estimates_before(&self, date: NaiveDate) -> Result<usize> {
        let mut estimates = self.estimates.write().await;
        let mut removed = 0;
        for records in estimates.values_mut() {
            let before = records.len();
            records.retain(|v| v.timestamp.date_naive() >= date);
            removed += before - records.len();
        }
        Ok(removed)
    }
}
