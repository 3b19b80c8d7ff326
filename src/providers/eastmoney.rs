use crate::core::model::NavObservation;
use crate::core::nav::NavHistoryProvider;
use crate::providers::util::with_retry;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone};
use serde::Deserialize;
use tracing::{debug, instrument};

const HISTORY_VARIABLE: &str = "Data_netWorthTrend";

/// Confirmed NAV history from the Eastmoney fund data script.
pub struct EastmoneyProvider {
    base_url: String,
    client: reqwest::Client,
}

impl EastmoneyProvider {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        EastmoneyProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct TrendPoint {
    /// Milliseconds since epoch, midnight of the NAV date in UTC+8.
    x: i64,
    y: f64,
}

/// Extracts the NAV trend array from the data script.
fn parse_history(fund_code: &str, script: &str) -> Result<Vec<NavObservation>> {
    let start = script
        .find(HISTORY_VARIABLE)
        .ok_or_else(|| anyhow!("No NAV history in response for {}", fund_code))?;
    let rest = &script[start + HISTORY_VARIABLE.len()..];
    let open = rest
        .find('[')
        .ok_or_else(|| anyhow!("Malformed NAV history for {}", fund_code))?;
    let close = rest[open..]
        .find("];")
        .ok_or_else(|| anyhow!("Unterminated NAV history for {}", fund_code))?;
    let points: Vec<TrendPoint> = serde_json::from_str(&rest[open..open + close + 1])
        .with_context(|| format!("Failed to parse NAV history for {fund_code}"))?;

    let offset = FixedOffset::east_opt(8 * 3600).ok_or_else(|| anyhow!("Invalid UTC offset"))?;
    Ok(points
        .into_iter()
        .filter(|p| p.y.is_finite() && p.y > 0.0)
        .filter_map(|p| {
            let date = offset.timestamp_millis_opt(p.x).single()?.date_naive();
            Some(NavObservation {
                fund_code: fund_code.to_string(),
                date,
                nav: p.y,
            })
        })
        .collect())
}

#[async_trait]
impl NavHistoryProvider for EastmoneyProvider {
    #[instrument(name = "EastmoneyNavFetch", skip(self))]
    async fn fetch_nav_history(&self, fund_code: &str) -> Result<Vec<NavObservation>> {
        let url = format!("{}/pingzhongdata/{}.js", self.base_url, fund_code);
        debug!("Requesting NAV history from {}", url);

        let body = with_retry(
            || async {
                self.client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            },
            2,
            500,
        )
        .await
        .with_context(|| format!("Request error for fund {fund_code}, URL: {url}"))?;

        let history = parse_history(fund_code, &body)?;
        debug!("Received {} NAV observations", history.len());
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCRIPT: &str = r#"var fS_name = "易方达蓝筹精选混合";var fS_code = "005827";
/*单位净值走势 equityReturn-净值回报 unitMoney-每份派送金*/var Data_netWorthTrend = [{"x":1711900800000,"y":1.8512,"equityReturn":0.52,"unitMoney":""},{"x":1711987200000,"y":1.8436,"equityReturn":-0.41,"unitMoney":""}];/*累计净值走势*/var Data_ACWorthTrend = [[1711900800000,1.8512]];"#;

    #[test]
    fn test_parse_history_uses_beijing_dates() {
        let history = parse_history("005827", SCRIPT).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].date, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(history[0].nav, 1.8512);
        assert_eq!(history[1].date, NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());
    }

    #[test]
    fn test_parse_history_missing_variable() {
        assert!(parse_history("005827", "var fS_code = \"005827\";").is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_nav_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pingzhongdata/005827.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SCRIPT))
            .mount(&server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5));
        let provider = EastmoneyProvider::new(&server.uri(), client);
        let history = provider.fetch_nav_history("005827").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].nav, 1.8436);
    }
}
