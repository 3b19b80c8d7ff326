//! Persistence seams of the engine.
//!
//! Holdings snapshots are written by an external ingestion process; the engine
//! only reads them. NAV history and estimated valuations are owned by the
//! engine.

use crate::core::model::{EstimatedValuation, Fund, Holding, NavObservation};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait HoldingsStore: Send + Sync {
    async fn list_funds(&self) -> Result<Vec<Fund>>;

    /// Latest disclosed snapshot for `fund_code` with `as_of <= date`.
    /// Empty when the fund has no disclosure on or before `date`.
    async fn get_holdings(&self, fund_code: &str, date: NaiveDate) -> Result<Vec<Holding>>;
}

#[async_trait]
pub trait NavStore: Send + Sync {
    /// The most recent `window` observations, ascending by date.
    async fn get_nav_series(&self, fund_code: &str, window: usize) -> Result<Vec<NavObservation>>;

    async fn latest_nav(&self, fund_code: &str) -> Result<Option<NavObservation>>;

    /// Stores an observation unless one already exists for its date.
    /// Returns whether it was written.
    async fn append_nav(&self, observation: NavObservation) -> Result<bool>;

    async fn append_estimated_valuation(&self, valuation: EstimatedValuation) -> Result<()>;

    /// Estimated valuations of `fund_code` whose timestamp falls on `date`
    /// (UTC), ascending by timestamp.
    async fn estimated_valuations(
        &self,
        fund_code: &str,
        date: NaiveDate,
    ) -> Result<Vec<EstimatedValuation>>;

    /// Deletes estimated valuations dated before `date`. Returns the number removed.
    async fn purge_estimates_before(&self, date: NaiveDate) -> Result<usize>;
}
