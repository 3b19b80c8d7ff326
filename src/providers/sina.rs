use crate::core::error::QuoteError;
use crate::core::model::{Market, Quote, Symbol};
use crate::core::quote::QuoteProvider;
use crate::providers::util::{classify_status, transport_error};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::collections::HashMap;
use tracing::{debug, instrument};

const PROVIDER_ID: &str = "sina";
const REFERER: &str = "https://finance.sina.com.cn";

/// Batch quote feed of Sina Finance (`hq.sinajs.cn`).
pub struct SinaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl SinaProvider {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        SinaProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

/// Key the feed uses for `symbol`, `None` for venues it does not cover.
fn sina_key(symbol: &Symbol) -> Option<String> {
    match symbol.market {
        Market::Shanghai => Some(format!("sh{}", symbol.code)),
        Market::Shenzhen => Some(format!("sz{}", symbol.code)),
        Market::HongKong => Some(format!("hk{:0>5}", symbol.code)),
        Market::Us => Some(format!("gb_{}", symbol.code.to_lowercase())),
        Market::Other => None,
    }
}

fn beijing() -> Option<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
}

fn local_timestamp(date: &str, time: &str, date_format: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), date_format).ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
        .ok()?;
    beijing()?
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn field(fields: &[&str], index: usize) -> Option<f64> {
    fields.get(index)?.trim().parse::<f64>().ok()
}

/// Parses one quoted payload into `(last, previous_close, timestamp)`.
fn parse_fields(market: Market, payload: &str) -> Option<(f64, f64, Option<DateTime<Utc>>)> {
    let fields: Vec<&str> = payload.split(',').collect();
    match market {
        Market::Shanghai | Market::Shenzhen => {
            let timestamp = match (fields.get(30), fields.get(31)) {
                (Some(d), Some(t)) => local_timestamp(d, t, "%Y-%m-%d"),
                _ => None,
            };
            Some((field(&fields, 3)?, field(&fields, 2)?, timestamp))
        }
        Market::HongKong => {
            let timestamp = match (fields.get(17), fields.get(18)) {
                (Some(d), Some(t)) => local_timestamp(d, t, "%Y/%m/%d"),
                _ => None,
            };
            Some((field(&fields, 6)?, field(&fields, 3)?, timestamp))
        }
        Market::Us => {
            let last = field(&fields, 1)?;
            let pct = field(&fields, 2)?;
            let timestamp = fields.get(3).and_then(|s| {
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .and_then(|dt| beijing()?.from_local_datetime(&dt).single())
                    .map(|dt| dt.with_timezone(&Utc))
            });
            Some((last, last / (1.0 + pct / 100.0), timestamp))
        }
        Market::Other => None,
    }
}

/// Splits the response body into `key -> payload` for non-empty payloads.
fn parse_body(body: &str) -> HashMap<&str, &str> {
    body.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("var hq_str_")?;
            let (key, value) = rest.split_once('=')?;
            let payload = value.trim().trim_end_matches(';').trim_matches('"');
            (!payload.is_empty()).then_some((key.trim(), payload))
        })
        .collect()
}

#[async_trait]
impl QuoteProvider for SinaProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn supports(&self, market: Market) -> bool {
        market != Market::Other
    }

    #[instrument(name = "SinaFetch", skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, QuoteError> {
        let keyed: Vec<(String, &Symbol)> = symbols
            .iter()
            .filter_map(|s| sina_key(s).map(|key| (key, s)))
            .collect();
        if keyed.is_empty() {
            return Ok(Vec::new());
        }

        let list = keyed
            .iter()
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/list={}", self.base_url, list);
        debug!("Requesting quotes from {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, REFERER)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;
        match classify_status(PROVIDER_ID, response.status(), response.headers()) {
            Ok(()) => {}
            Err(Some(error)) => return Err(error),
            Err(None) => return Ok(Vec::new()),
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;
        let body = String::from_utf8_lossy(&bytes);
        let payloads = parse_body(&body);
        let fetched_at = Utc::now();

        let quotes: Vec<Quote> = keyed
            .into_iter()
            .filter_map(|(key, symbol)| {
                let payload = payloads.get(key.as_str())?;
                let Some((last, previous_close, timestamp)) = parse_fields(symbol.market, payload)
                else {
                    debug!(symbol = %symbol, "Unparseable payload");
                    return None;
                };
                Some(Quote {
                    symbol: symbol.clone(),
                    last_price: last,
                    previous_close,
                    timestamp: timestamp.unwrap_or(fetched_at),
                    source: PROVIDER_ID.to_string(),
                    stale: false,
                })
            })
            .collect();
        debug!("Received {} of {} quotes", quotes.len(), symbols.len());
        Ok(quotes)
    }
}
