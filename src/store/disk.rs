use crate::core::model::{EstimatedValuation, NavObservation};
use crate::core::store::NavStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// NAV history and estimates persisted in a fjall keyspace.
///
/// Keys are `code/date` for NAVs and `code/date/millis` for estimates, so a
/// prefix scan returns a fund's records in chronological order.
pub struct DiskStore {
    keyspace: Keyspace,
    navs: PartitionHandle,
    estimates: PartitionHandle,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory {}", path.display()))?;
        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let navs = keyspace.open_partition("nav", PartitionCreateOptions::default())?;
        let estimates = keyspace.open_partition("estimates", PartitionCreateOptions::default())?;
        debug!("Opened disk store at {}", path.display());
        Ok(Self {
            keyspace,
            navs,
            estimates,
        })
    }

    fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to flush store")
    }
}

fn nav_key(fund_code: &str, date: NaiveDate) -> String {
    format!("{}/{}", fund_code, date.format(DATE_FORMAT))
}

fn estimate_key(valuation: &EstimatedValuation) -> String {
    format!(
        "{}/{}/{:013}",
        valuation.fund_code,
        valuation.timestamp.date_naive().format(DATE_FORMAT),
        valuation.timestamp.timestamp_millis()
    )
}

fn decode<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).context("Corrupt record in store")
}

/// Date segment of an estimate key.
fn estimate_date(key: &[u8]) -> Option<NaiveDate> {
    let key = std::str::from_utf8(key).ok()?;
    let date = key.split('/').nth(1)?;
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

#[async_trait]
impl NavStore for DiskStore {
    async fn get_nav_series(&self, fund_code: &str, window: usize) -> Result<Vec<NavObservation>> {
        let mut series = self
            .navs
            .prefix(format!("{fund_code}/"))
            .rev()
            .take(window)
            .map(|item| {
                let (_, value) = item?;
                decode(&value)
            })
            .collect::<Result<Vec<NavObservation>>>()?;
        series.reverse();
        Ok(series)
    }

    async fn latest_nav(&self, fund_code: &str) -> Result<Option<NavObservation>> {
        match self.navs.prefix(format!("{fund_code}/")).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    async fn append_nav(&self, observation: NavObservation) -> Result<bool> {
        let key = nav_key(&observation.fund_code, observation.date);
        if self.navs.contains_key(&key)? {
            return Ok(false);
        }
        self.navs.insert(&key, serde_json::to_vec(&observation)?)?;
        self.persist()?;
        Ok(true)
    }

    async fn append_estimated_valuation(&self, valuation: EstimatedValuation) -> Result<()> {
        let key = estimate_key(&valuation);
        self.estimates.insert(&key, serde_json::to_vec(&valuation)?)?;
        self.persist()
    }

    async fn estimated_valuations(
        &self,
        fund_code: &str,
        date: NaiveDate,
    ) -> Result<Vec<EstimatedValuation>> {
        let prefix = format!("{}/{}/", fund_code, date.format(DATE_FORMAT));
        self.estimates
            .prefix(prefix)
            .map(|item| {
                let (_, value) = item?;
                decode(&value)
            })
            .collect()
    }

    async fn purge_estimates_before(&self, date: NaiveDate) -> Result<usize> {
        let mut expired = Vec::new();
        for item in self.estimates.iter() {
            let (key, _) = item?;
            if estimate_date(&key).is_some_and(|d| d < date) {
                expired.push(key);
            }
        }
        for key in &expired {
            self.estimates.remove(key.clone())?;
        }
        if !expired.is_empty() {
            self.persist()?;
        }
        Ok(expired.len())
    }
}
