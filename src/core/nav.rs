//! Confirmed NAV history, pulled from an upstream source after the close.

use crate::core::model::{Fund, NavObservation};
use crate::core::store::NavStore;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

#[async_trait]
pub trait NavHistoryProvider: Send + Sync {
    /// Full published history of `fund_code`, in any order.
    async fn fetch_nav_history(&self, fund_code: &str) -> Result<Vec<NavObservation>>;
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavSyncReport {
    /// Funds whose history was fetched, with the number of new observations.
    pub synced: Vec<(String, usize)>,
    pub failed: Vec<String>,
}

impl NavSyncReport {
    pub fn appended(&self) -> usize {
        self.synced.iter().map(|(_, n)| n).sum()
    }
}

/// Appends observations not yet stored for each fund. A failure for one fund
/// is logged and does not stop the others.
pub async fn sync_nav_history(
    provider: &dyn NavHistoryProvider,
    store: &dyn NavStore,
    funds: &[Fund],
) -> NavSyncReport {
    let mut report = NavSyncReport::default();
    for fund in funds {
        match sync_fund(provider, store, &fund.code).await {
            Ok(appended) => {
                info!(fund = %fund.code, appended, "NAV history synced");
                report.synced.push((fund.code.clone(), appended));
            }
            Err(e) => {
                error!(fund = %fund.code, "NAV history sync failed: {:#}", e);
                report.failed.push(fund.code.clone());
            }
        }
    }
    report
}

async fn sync_fund(
    provider: &dyn NavHistoryProvider,
    store: &dyn NavStore,
    fund_code: &str,
) -> Result<usize> {
    let mut history = provider.fetch_nav_history(fund_code).await?;
    history.sort_by_key(|obs| obs.date);

    let latest = store.latest_nav(fund_code).await?.map(|obs| obs.date);
    let mut appended = 0;
    for observation in history {
        if latest.is_some_and(|date| observation.date <= date) {
            continue;
        }
        if store.append_nav(observation).await? {
            appended += 1;
        }
    }
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::FundKind;
    use crate::store::memory::MemoryStore;
    use chrono::NaiveDate;

    struct StaticHistory;

    #[async_trait]
    impl NavHistoryProvider for StaticHistory {
        async fn fetch_nav_history(&self, fund_code: &str) -> Result<Vec<NavObservation>> {
            if fund_code == "000001" {
                anyhow::bail!("upstream returned 500");
            }
            Ok((1..=3)
                .rev()
                .map(|day| NavObservation {
                    fund_code: fund_code.to_string(),
                    date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
                    nav: 1.0 + day as f64 / 100.0,
                })
                .collect())
        }
    }

    fn fund(code: &str) -> Fund {
        Fund {
            code: code.to_string(),
            name: code.to_string(),
            kind: FundKind::DomesticEquity,
        }
    }

    #[tokio::test]
    async fn test_sync_appends_only_new_dates_and_isolates_failures() {
        let store = MemoryStore::default();
        store
            .append_nav(NavObservation {
                fund_code: "110011".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                nav: 9.99,
            })
            .await
            .unwrap();

        let funds = [fund("000001"), fund("110011")];
        let report = sync_nav_history(&StaticHistory, &store, &funds).await;

        assert_eq!(report.failed, vec!["000001".to_string()]);
        assert_eq!(report.synced, vec![("110011".to_string(), 2)]);

        let series = store.get_nav_series("110011", 10).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].nav, 9.99);
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));
    }
}
