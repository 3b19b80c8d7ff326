//! Domain entities shared by the valuation engine, the stores and the providers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Listing venue of a tradable security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "sh", alias = "shanghai", alias = "ss")]
    Shanghai,
    #[serde(rename = "sz", alias = "shenzhen")]
    Shenzhen,
    #[serde(rename = "hk", alias = "hongkong")]
    HongKong,
    #[serde(rename = "us")]
    Us,
    /// A venue no quote provider covers. Holdings on it keep their weight but
    /// never receive a quote.
    #[serde(rename = "other")]
    Other,
}

impl Market {
    pub fn suffix(&self) -> &'static str {
        match self {
            Market::Shanghai => "SH",
            Market::Shenzhen => "SZ",
            Market::HongKong => "HK",
            Market::Us => "US",
            Market::Other => "XX",
        }
    }
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SH" | "SS" | "SHANGHAI" => Ok(Market::Shanghai),
            "SZ" | "SHENZHEN" => Ok(Market::Shenzhen),
            "HK" | "HONGKONG" => Ok(Market::HongKong),
            "US" | "O" | "N" | "OQ" => Ok(Market::Us),
            _ => Err(anyhow::anyhow!("Invalid market: {}", s)),
        }
    }
}

/// Market classification of a fund as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundKind {
    #[serde(rename = "domestic", alias = "domestic-equity")]
    DomesticEquity,
    #[serde(rename = "hk", alias = "hong-kong")]
    HongKong,
    #[serde(rename = "us")]
    Us,
    /// Cross-border fund holding foreign listings.
    #[serde(rename = "qdii")]
    Qdii,
}

impl Display for FundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FundKind::DomesticEquity => "Domestic",
                FundKind::HongKong => "HK",
                FundKind::Us => "US",
                FundKind::Qdii => "QDII",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    /// Fund code, also used as the fund identifier across stores.
    pub code: String,
    pub name: String,
    pub kind: FundKind,
}

/// A security identified by its code and the venue quotes must come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Symbol {
    pub code: String,
    pub market: Market,
}

impl Symbol {
    pub fn new(code: impl Into<String>, market: Market) -> Self {
        Self {
            code: code.into(),
            market,
        }
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.code, self.market.suffix())
    }
}

/// One disclosed constituent of a fund, as written by the ingestion process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub fund_code: String,
    pub symbol: String,
    /// Venue when the disclosure states it; otherwise inferred from the code.
    pub market: Option<Market>,
    /// Fraction of the fund's net assets, in `[0, 1]`.
    pub weight: f64,
    pub as_of: NaiveDate,
}

/// A holding after look-through resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedHolding {
    pub symbol: Symbol,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub last_price: f64,
    pub previous_close: f64,
    pub timestamp: DateTime<Utc>,
    /// Identifier of the provider that produced the quote.
    pub source: String,
    /// Set when the quote is a last-known-good value served from the cache.
    pub stale: bool,
}

impl Quote {
    /// Fractional change against the previous close, `None` when the quote
    /// cannot produce a meaningful return.
    pub fn change(&self) -> Option<f64> {
        if self.is_valid() {
            Some(self.last_price / self.previous_close - 1.0)
        } else {
            None
        }
    }

    pub fn is_valid(&self) -> bool {
        self.last_price.is_finite()
            && self.previous_close.is_finite()
            && self.last_price > 0.0
            && self.previous_close > 0.0
    }
}

/// Official NAV confirmed for a fund on a trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavObservation {
    pub fund_code: String,
    pub date: NaiveDate,
    pub nav: f64,
}

/// Output of one scheduler tick for one fund. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedValuation {
    pub fund_code: String,
    pub timestamp: DateTime<Utc>,
    pub estimated_change: f64,
    /// `None` when no confirmed NAV is known for the fund yet.
    pub estimated_nav: Option<f64>,
    pub completeness: f64,
    /// At least one contributing quote came from the cache fallback.
    pub stale: bool,
    /// Completeness fell below the configured threshold.
    pub partial_data: bool,
}
