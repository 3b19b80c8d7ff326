use crate::core::error::QuoteError;
use crate::core::model::{Market, Quote, Symbol};
use crate::core::quote::QuoteProvider;
use crate::providers::util::{classify_status, transport_error};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument};

const PROVIDER_ID: &str = "yahoo";

/// Yahoo Finance chart API, one request per symbol.
pub struct YahooProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        YahooProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(alias = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    #[serde(alias = "previousClose")]
    previous_close: Option<f64>,
    #[serde(alias = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

/// Ticker Yahoo lists `symbol` under.
fn yahoo_ticker(symbol: &Symbol) -> Option<String> {
    match symbol.market {
        Market::Shanghai => Some(format!("{}.SS", symbol.code)),
        Market::Shenzhen => Some(format!("{}.SZ", symbol.code)),
        Market::HongKong => {
            let trimmed = symbol.code.trim_start_matches('0');
            Some(format!("{trimmed:0>4}.HK"))
        }
        Market::Us => Some(symbol.code.to_uppercase().replace('.', "-")),
        Market::Other => None,
    }
}

impl YahooProvider {
    async fn fetch_one(&self, symbol: &Symbol, ticker: &str) -> Result<Option<Quote>, QuoteError> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range=1d",
            self.base_url, ticker
        );
        debug!("Requesting price data from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;
        match classify_status(PROVIDER_ID, response.status(), response.headers()) {
            Ok(()) => {}
            Err(Some(error)) => return Err(error),
            Err(None) => return Ok(None),
        }

        let data = response
            .json::<YahooChartResponse>()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;
        let Some(meta) = data
            .chart
            .result
            .and_then(|items| items.into_iter().next())
            .map(|item| item.meta)
        else {
            return Ok(None);
        };
        let (Some(last), Some(previous_close)) = (
            meta.regular_market_price,
            meta.chart_previous_close.or(meta.previous_close),
        ) else {
            return Ok(None);
        };

        let timestamp = meta
            .regular_market_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        Ok(Some(Quote {
            symbol: symbol.clone(),
            last_price: last,
            previous_close,
            timestamp,
            source: PROVIDER_ID.to_string(),
            stale: false,
        }))
    }
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn supports(&self, market: Market) -> bool {
        market != Market::Other
    }

    /// Throttling on any request fails the whole call so the provider cools
    /// down. Other per-symbol failures only drop that symbol, unless every
    /// request failed.
    #[instrument(name = "YahooPriceFetch", skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, QuoteError> {
        let requests: Vec<_> = symbols
            .iter()
            .filter_map(|s| yahoo_ticker(s).map(|ticker| (s, ticker)))
            .collect();
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = join_all(
            requests
                .iter()
                .map(|(symbol, ticker)| self.fetch_one(symbol, ticker)),
        )
        .await;

        let mut quotes = Vec::with_capacity(outcomes.len());
        let mut last_error = None;
        let mut failures = 0;
        for outcome in outcomes {
            match outcome {
                Ok(Some(quote)) => quotes.push(quote),
                Ok(None) => {}
                Err(error @ QuoteError::RateLimited { .. }) => return Err(error),
                Err(error) => {
                    failures += 1;
                    last_error = Some(error);
                }
            }
        }
        match last_error {
            Some(error) if failures == requests.len() => Err(error),
            _ => Ok(quotes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chart(price: f64, prev: f64) -> serde_json::Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "HKD",
                        "regularMarketPrice": price,
                        "chartPreviousClose": prev,
                        "regularMarketTime": 1711958400
                    }
                }],
                "error": null
            }
        })
    }

    fn provider(server: &MockServer) -> YahooProvider {
        let client = crate::providers::util::http_client(Duration::from_secs(5));
        YahooProvider::new(&server.uri(), client)
    }

    #[test]
    fn test_yahoo_tickers() {
        assert_eq!(
            yahoo_ticker(&Symbol::new("600519", Market::Shanghai)).unwrap(),
            "600519.SS"
        );
        assert_eq!(
            yahoo_ticker(&Symbol::new("000001", Market::Shenzhen)).unwrap(),
            "000001.SZ"
        );
        assert_eq!(
            yahoo_ticker(&Symbol::new("00700", Market::HongKong)).unwrap(),
            "0700.HK"
        );
        assert_eq!(
            yahoo_ticker(&Symbol::new("09988", Market::HongKong)).unwrap(),
            "9988.HK"
        );
        assert_eq!(yahoo_ticker(&Symbol::new("brk.b", Market::Us)).unwrap(), "BRK-B");
    }

    #[tokio::test]
    async fn test_fetch_skips_unknown_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/0700.HK"))
            .and(query_param("range", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart(303.2, 298.6)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let symbols = vec![
            Symbol::new("00700", Market::HongKong),
            Symbol::new("ZZZZ", Market::Us),
        ];
        let quotes = provider(&server).fetch(&symbols).await.unwrap();

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, symbols[0]);
        assert_eq!(quotes[0].last_price, 303.2);
        assert_eq!(quotes[0].previous_close, 298.6);
        assert_eq!(quotes[0].timestamp.timestamp(), 1711958400);
        assert_eq!(quotes[0].source, "yahoo");
    }

    #[tokio::test]
    async fn test_throttling_fails_whole_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart(170.0, 172.0)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/MSFT"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .fetch(&[Symbol::new("AAPL", Market::Us), Symbol::new("MSFT", Market::Us)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QuoteError::RateLimited {
                provider: "yahoo".to_string(),
                retry_after: Some(Duration::from_secs(30)),
            }
        );
    }

    #[tokio::test]
    async fn test_all_requests_failing_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server)
            .fetch(&[Symbol::new("600519", Market::Shanghai)])
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::ProviderUnavailable { .. }));
    }
}
