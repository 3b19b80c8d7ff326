//! Look-through resolution of fund holdings to quotable symbols.

use crate::core::error::ValuationError;
use crate::core::model::{Fund, FundKind, Holding, Market, ResolvedHolding, Symbol};
use crate::core::store::HoldingsStore;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Tolerance on the sum of weights before a snapshot is rejected.
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Number of largest positions used for the concentration figure.
const CONCENTRATION_TOP_N: usize = 10;

const QDII_KEYWORDS: [&str; 7] = [
    "QDII",
    "纳斯达克",
    "标普",
    "恒生",
    "美国",
    "全球",
    "海外",
];

/// Holdings of one fund ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub fund_code: String,
    /// Sorted by weight, largest first.
    pub holdings: Vec<ResolvedHolding>,
    pub total_weight: f64,
    /// Combined weight of the ten largest positions.
    pub concentration: f64,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

pub struct HoldingsResolver {
    store: Arc<dyn HoldingsStore>,
    min_weight: f64,
}

impl HoldingsResolver {
    pub fn new(store: Arc<dyn HoldingsStore>, min_weight: f64) -> Self {
        Self { store, min_weight }
    }

    /// Loads the snapshot effective on `as_of` and resolves it.
    #[instrument(name = "ResolveHoldings", skip(self, fund), fields(fund = %fund.code))]
    pub async fn resolve(
        &self,
        fund: &Fund,
        as_of: NaiveDate,
    ) -> Result<Resolution, ValuationError> {
        let holdings = self
            .store
            .get_holdings(&fund.code, as_of)
            .await
            .map_err(|e| ValuationError::failed(&fund.code, e))?;
        if holdings.is_empty() {
            warn!("No holdings disclosed on or before {}", as_of);
        }
        resolve_holdings(fund, &holdings, self.min_weight)
    }
}

/// Normalizes symbols, de-duplicates and drops dust positions.
///
/// When several holdings resolve to the same symbol only the first is kept.
pub fn resolve_holdings(
    fund: &Fund,
    holdings: &[Holding],
    min_weight: f64,
) -> Result<Resolution, ValuationError> {
    let mut merged: Vec<ResolvedHolding> = Vec::with_capacity(holdings.len());
    let mut seen: HashSet<Symbol> = HashSet::new();

    for holding in holdings {
        if !holding.weight.is_finite() || holding.weight < 0.0 || holding.weight > 1.0 {
            return Err(ValuationError::InvalidWeight {
                fund: fund.code.clone(),
                symbol: holding.symbol.clone(),
                weight: holding.weight,
            });
        }
        let symbol = normalize_symbol(&holding.symbol, holding.market, fund.kind);
        if !seen.insert(symbol.clone()) {
            debug!("Ignoring duplicate holding {}", symbol);
            continue;
        }
        merged.push(ResolvedHolding {
            symbol,
            weight: holding.weight,
        });
    }

    let before = merged.len();
    merged.retain(|holding| holding.weight >= min_weight && holding.weight > 0.0);
    if merged.len() < before {
        debug!(
            "Dropped {} holding(s) below minimum weight {}",
            before - merged.len(),
            min_weight
        );
    }

    let total_weight: f64 = merged.iter().map(|h| h.weight).sum();
    if total_weight > 1.0 + WEIGHT_TOLERANCE {
        return Err(ValuationError::WeightsExceedOne {
            fund: fund.code.clone(),
            total: total_weight,
        });
    }

    merged.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    let concentration = merged
        .iter()
        .take(CONCENTRATION_TOP_N)
        .map(|h| h.weight)
        .sum();

    Ok(Resolution {
        fund_code: fund.code.clone(),
        holdings: merged,
        total_weight,
        concentration,
    })
}

/// Builds a symbol from a raw disclosed code. An explicit market wins over
/// anything inferred from the code.
pub fn normalize_symbol(raw: &str, market: Option<Market>, kind: FundKind) -> Symbol {
    let (code, hinted) = split_market_hint(raw.trim());
    let market = market.or(hinted).unwrap_or_else(|| classify(&code, kind));
    let code = match market {
        Market::HongKong => pad_hk_code(&code),
        Market::Us => code.to_uppercase(),
        _ => code,
    };
    Symbol::new(code, market)
}

/// Infers the venue of a bare code.
///
/// Six-digit numeric codes are mainland listings except in cross-border
/// funds, where they most often belong to venues no provider covers.
/// Shanghai codes start with 60, 68, 90, 11 or 5 (exchange-traded funds).
pub fn classify(code: &str, kind: FundKind) -> Market {
    let all_digits = !code.is_empty() && code.chars().all(|c| c.is_ascii_digit());

    if all_digits && code.len() == 6 {
        if kind == FundKind::Qdii {
            return Market::Other;
        }
        return if ["60", "68", "90", "11", "5"]
            .iter()
            .any(|prefix| code.starts_with(prefix))
        {
            Market::Shanghai
        } else {
            Market::Shenzhen
        };
    }
    if all_digits && code.len() <= 5 {
        return Market::HongKong;
    }
    if !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '.' || c == '-')
    {
        return Market::Us;
    }
    Market::Other
}

/// Guesses a fund's kind from its name.
pub fn infer_fund_kind(name: &str) -> FundKind {
    let upper = name.to_uppercase();
    if QDII_KEYWORDS.iter().any(|k| upper.contains(k)) {
        FundKind::Qdii
    } else if upper.contains("港股") || upper.contains("香港") {
        FundKind::HongKong
    } else {
        FundKind::DomesticEquity
    }
}

fn split_market_hint(raw: &str) -> (String, Option<Market>) {
    if let Some((code, suffix)) = raw.rsplit_once('.') {
        let upper = suffix.to_uppercase();
        let market = match upper.as_str() {
            "SH" | "SS" => Some(Market::Shanghai),
            "SZ" => Some(Market::Shenzhen),
            "HK" => Some(Market::HongKong),
            "O" | "N" | "OQ" | "US" => Some(Market::Us),
            _ => None,
        };
        if market.is_some() {
            return (code.to_string(), market);
        }
    }

    let lower = raw.to_lowercase();
    for (prefix, market) in [
        ("sh", Market::Shanghai),
        ("sz", Market::Shenzhen),
        ("hk", Market::HongKong),
    ] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return (rest.to_string(), Some(market));
            }
        }
    }
    (raw.to_string(), None)
}

fn pad_hk_code(code: &str) -> String {
    if code.chars().all(|c| c.is_ascii_digit()) && code.len() < 5 {
        format!("{code:0>5}")
    } else {
        code.to_string()
    }
}
