//! Weighted aggregation of constituent returns into a fund estimate.

use crate::core::error::QuoteError;
use crate::core::model::{EstimatedValuation, Quote, ResolvedHolding, Symbol};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Weight coverage of a holdings set given which symbols have a usable quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renormalized {
    pub total_weight: f64,
    pub available_weight: f64,
    /// `available_weight / total_weight`, 0 when the fund holds nothing.
    pub completeness: f64,
    /// Factor applied to available contributions, `total_weight / available_weight`.
    /// 0 when nothing is available.
    pub scale: f64,
}

/// Pure function of the holding weights and the set of quoted symbols.
pub fn renormalize(holdings: &[ResolvedHolding], available: &HashSet<Symbol>) -> Renormalized {
    let mut total_weight = 0.0;
    let mut available_weight = 0.0;
    for holding in holdings {
        total_weight += holding.weight;
        if available.contains(&holding.symbol) {
            available_weight += holding.weight;
        }
    }

    if available_weight <= 0.0 || total_weight <= 0.0 {
        return Renormalized {
            total_weight,
            available_weight,
            completeness: 0.0,
            scale: 0.0,
        };
    }
    Renormalized {
        total_weight,
        available_weight,
        completeness: available_weight / total_weight,
        scale: total_weight / available_weight,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    completeness_threshold: f64,
}

impl Aggregator {
    pub fn new(completeness_threshold: f64) -> Self {
        Self {
            completeness_threshold,
        }
    }

    /// Combines holdings and quotes into one estimate.
    ///
    /// Holdings without a usable quote are excluded and the remaining
    /// contributions are scaled up to the full invested weight. Identical
    /// inputs produce bit-identical outputs.
    pub fn aggregate(
        &self,
        fund_code: &str,
        holdings: &[ResolvedHolding],
        quotes: &HashMap<Symbol, Result<Quote, QuoteError>>,
        last_nav: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> EstimatedValuation {
        let mut available = HashSet::with_capacity(holdings.len());
        let mut stale = false;
        let mut raw_change = 0.0;

        for holding in holdings {
            let Some(Ok(quote)) = quotes.get(&holding.symbol) else {
                continue;
            };
            let Some(change) = quote.change() else {
                continue;
            };
            raw_change += holding.weight * change;
            stale |= quote.stale;
            available.insert(holding.symbol.clone());
        }

        let coverage = renormalize(holdings, &available);
        let estimated_change = raw_change * coverage.scale;
        let partial_data = coverage.completeness < self.completeness_threshold;
        if partial_data {
            warn!(
                fund = %fund_code,
                completeness = coverage.completeness,
                "Estimate built on partial data"
            );
        }

        EstimatedValuation {
            fund_code: fund_code.to_string(),
            timestamp,
            estimated_change,
            estimated_nav: last_nav.map(|nav| nav * (1.0 + estimated_change)),
            completeness: coverage.completeness,
            stale,
            partial_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Market;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 3, 0, 0).unwrap()
    }

    fn sym(code: &str) -> Symbol {
        Symbol::new(code, Market::Shanghai)
    }

    fn holding(code: &str, weight: f64) -> ResolvedHolding {
        ResolvedHolding {
            symbol: sym(code),
            weight,
        }
    }

    fn quote(code: &str, last: f64, prev: f64, stale: bool) -> (Symbol, Result<Quote, QuoteError>) {
        (
            sym(code),
            Ok(Quote {
                symbol: sym(code),
                last_price: last,
                previous_close: prev,
                timestamp: ts(),
                source: "test".to_string(),
                stale,
            }),
        )
    }

    fn missing(code: &str) -> (Symbol, Result<Quote, QuoteError>) {
        (sym(code), Err(QuoteError::SymbolNotFound(sym(code).to_string())))
    }

    #[test]
    fn test_full_coverage_equals_weighted_sum() {
        let holdings = vec![holding("600001", 0.5), holding("600002", 0.3), holding("600003", 0.2)];
        let quotes: HashMap<_, _> = [
            quote("600001", 10.3, 10.0, false),
            quote("600002", 19.0, 20.0, false),
            quote("600003", 5.05, 5.0, false),
        ]
        .into_iter()
        .collect();

        let valuation =
            Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, Some(1.5), ts());

        let expected =
            0.5 * (10.3 / 10.0 - 1.0) + 0.3 * (19.0 / 20.0 - 1.0) + 0.2 * (5.05 / 5.0 - 1.0);
        assert_abs_diff_eq!(valuation.estimated_change, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(valuation.completeness, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            valuation.estimated_nav.unwrap(),
            1.5 * (1.0 + expected),
            epsilon = 1e-12
        );
        assert!(!valuation.stale);
        assert!(!valuation.partial_data);
    }

    #[test]
    fn test_missing_quote_is_renormalized() {
        let holdings = vec![holding("600001", 0.9), holding("600002", 0.1)];
        let quotes: HashMap<_, _> = [quote("600001", 10.5, 10.0, false), missing("600002")]
            .into_iter()
            .collect();

        let valuation = Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, None, ts());

        assert_abs_diff_eq!(valuation.estimated_change, 0.05, epsilon = 1e-9);
        assert_abs_diff_eq!(valuation.completeness, 0.9, epsilon = 1e-12);
        assert_eq!(valuation.estimated_nav, None);
        assert!(!valuation.partial_data);
    }

    #[test]
    fn test_residual_cash_contributes_nothing() {
        let holdings = vec![holding("600001", 0.6)];
        let quotes: HashMap<_, _> = [quote("600001", 11.0, 10.0, false)].into_iter().collect();

        let valuation = Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, None, ts());

        assert_abs_diff_eq!(valuation.estimated_change, 0.06, epsilon = 1e-9);
        assert_abs_diff_eq!(valuation.completeness, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_low_completeness_is_flagged() {
        let holdings = vec![holding("600001", 0.3), holding("600002", 0.7)];
        let quotes: HashMap<_, _> = [quote("600001", 10.5, 10.0, false), missing("600002")]
            .into_iter()
            .collect();

        let valuation = Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, None, ts());

        assert!(valuation.partial_data);
        assert_abs_diff_eq!(valuation.completeness, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(valuation.estimated_change, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_no_quotes_yields_zero_change() {
        let holdings = vec![holding("600001", 0.5)];
        let quotes: HashMap<_, _> = [missing("600001")].into_iter().collect();

        let valuation =
            Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, Some(1.0), ts());

        assert_eq!(valuation.estimated_change, 0.0);
        assert_eq!(valuation.completeness, 0.0);
        assert_eq!(valuation.estimated_nav, Some(1.0));
        assert!(valuation.partial_data);
    }

    #[test]
    fn test_stale_quote_marks_estimate_stale() {
        let holdings = vec![holding("600001", 0.5), holding("600002", 0.5)];
        let quotes: HashMap<_, _> = [
            quote("600001", 10.5, 10.0, true),
            quote("600002", 10.0, 10.0, false),
        ]
        .into_iter()
        .collect();

        let valuation = Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, None, ts());
        assert!(valuation.stale);
    }

    #[test]
    fn test_invalid_quote_counts_as_missing() {
        let holdings = vec![holding("600001", 0.5), holding("600002", 0.5)];
        let quotes: HashMap<_, _> = [
            quote("600001", 10.5, 10.0, false),
            quote("600002", 10.0, 0.0, false),
        ]
        .into_iter()
        .collect();

        let valuation = Aggregator::new(0.6).aggregate("110011", &holdings, &quotes, None, ts());
        assert_abs_diff_eq!(valuation.completeness, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(valuation.estimated_change, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let holdings: Vec<ResolvedHolding> = (0..30)
            .map(|i| holding(&format!("6000{i:02}"), 0.01 + i as f64 * 0.001))
            .collect();
        let quotes: HashMap<_, _> = (0..30)
            .filter(|i| i % 7 != 0)
            .map(|i| quote(&format!("6000{i:02}"), 10.0 + i as f64 * 0.013, 10.0, false))
            .collect();
        let aggregator = Aggregator::new(0.6);

        let first = aggregator.aggregate("110011", &holdings, &quotes, Some(1.2345), ts());
        let second = aggregator.aggregate("110011", &holdings, &quotes, Some(1.2345), ts());

        assert_eq!(first.estimated_change.to_bits(), second.estimated_change.to_bits());
        assert_eq!(first.completeness.to_bits(), second.completeness.to_bits());
        assert_eq!(first, second);
    }

    #[test]
    fn test_renormalize_standalone() {
        let holdings = vec![holding("600001", 0.9), holding("600002", 0.1)];
        let available: HashSet<Symbol> = [sym("600001")].into_iter().collect();

        let coverage = renormalize(&holdings, &available);

        assert_abs_diff_eq!(coverage.completeness, 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(coverage.scale, 1.0 / 0.9, epsilon = 1e-12);

        let none = renormalize(&holdings, &HashSet::new());
        assert_eq!(none.completeness, 0.0);
        assert_eq!(none.scale, 0.0);
    }
}
