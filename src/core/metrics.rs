//! Risk metrics over a trailing NAV series.

use crate::core::error::MetricsError;
use crate::core::model::NavObservation;
use serde::Serialize;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Below this, the sample variance of returns is treated as zero.
const VARIANCE_EPSILON: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SharpeRatio {
    Defined(f64),
    /// Returns had no variance, so the ratio has no meaning.
    InsufficientVariance,
}

impl SharpeRatio {
    pub fn value(&self) -> Option<f64> {
        match self {
            SharpeRatio::Defined(value) => Some(*value),
            SharpeRatio::InsufficientVariance => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub sharpe: SharpeRatio,
    /// Positive fraction, 0 when the series never declined.
    pub max_drawdown: f64,
    pub annualized_volatility: f64,
    pub annualized_return: f64,
    pub total_return: f64,
    /// Number of NAV observations the metrics were computed from.
    pub window_size: usize,
}

/// Keeps the last `n` observations of an ascending series.
pub fn trailing_window(series: &[NavObservation], n: usize) -> &[NavObservation] {
    &series[series.len().saturating_sub(n)..]
}

/// Computes the metrics of an ascending NAV series. The caller trims the
/// series to the desired window first.
pub fn compute(
    series: &[NavObservation],
    risk_free_rate: f64,
) -> Result<RiskMetrics, MetricsError> {
    if series.len() < 2 {
        return Err(MetricsError::InsufficientData {
            observations: series.len(),
        });
    }
    for observation in series {
        if !observation.nav.is_finite() || observation.nav <= 0.0 {
            return Err(MetricsError::InvalidNav {
                date: observation.date,
                nav: observation.nav,
            });
        }
    }
    for pair in series.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(MetricsError::Unordered { date: pair[1].date });
        }
    }

    let navs: Vec<f64> = series.iter().map(|o| o.nav).collect();
    let returns = daily_returns(&navs);

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = if returns.len() > 1 {
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };

    let annualized_return = mean * TRADING_DAYS_PER_YEAR;
    let (annualized_volatility, sharpe) = if variance <= VARIANCE_EPSILON {
        (0.0, SharpeRatio::InsufficientVariance)
    } else {
        let volatility = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        (
            volatility,
            SharpeRatio::Defined((annualized_return - risk_free_rate) / volatility),
        )
    };

    Ok(RiskMetrics {
        sharpe,
        max_drawdown: max_drawdown(&navs),
        annualized_volatility,
        annualized_return,
        total_return: navs[navs.len() - 1] / navs[0] - 1.0,
        window_size: series.len(),
    })
}

/// `r_i = nav_i / nav_{i-1} - 1`.
pub fn daily_returns(navs: &[f64]) -> Vec<f64> {
    navs.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Largest decline from a running peak, as a positive fraction.
pub fn max_drawdown(navs: &[f64]) -> f64 {
    let Some(&first) = navs.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut worst: f64 = 0.0;
    for &nav in navs {
        peak = peak.max(nav);
        worst = worst.max(1.0 - nav / peak);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use chrono::{Days, NaiveDate};

    fn series(navs: &[f64]) -> Vec<NavObservation> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        navs.iter()
            .enumerate()
            .map(|(i, &nav)| NavObservation {
                fund_code: "110011".to_string(),
                date: start + Days::new(i as u64),
                nav,
            })
            .collect()
    }

    #[test]
    fn test_max_drawdown_from_running_peak() {
        let drawdown = max_drawdown(&[1.0, 1.1, 0.9, 1.2, 0.8]);
        assert_abs_diff_eq!(drawdown, 1.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_max_drawdown_monotonic_rise_is_zero() {
        assert_eq!(max_drawdown(&[1.0, 1.01, 1.02, 1.05]), 0.0);
    }

    #[test]
    fn test_constant_series_has_insufficient_variance() {
        let metrics = compute(&series(&[1.0, 1.0, 1.0, 1.0]), 0.02).unwrap();
        assert_eq!(metrics.sharpe, SharpeRatio::InsufficientVariance);
        assert_eq!(metrics.annualized_volatility, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert!(metrics.annualized_return.is_finite());
    }

    #[test]
    fn test_constant_growth_has_insufficient_variance() {
        let navs: Vec<f64> = (0..10).map(|i| 1.001f64.powi(i)).collect();
        let metrics = compute(&series(&navs), 0.02).unwrap();
        assert_eq!(metrics.sharpe, SharpeRatio::InsufficientVariance);
    }

    #[test]
    fn test_single_return_has_insufficient_variance() {
        let metrics = compute(&series(&[1.0, 1.1]), 0.02).unwrap();
        assert_eq!(metrics.sharpe, SharpeRatio::InsufficientVariance);
        assert_abs_diff_eq!(metrics.total_return, 0.1, epsilon = 1e-12);
        assert_eq!(metrics.window_size, 2);
    }

    #[test]
    fn test_fewer_than_two_observations() {
        assert_eq!(
            compute(&series(&[1.0]), 0.02),
            Err(MetricsError::InsufficientData { observations: 1 })
        );
        assert_eq!(
            compute(&[], 0.02),
            Err(MetricsError::InsufficientData { observations: 0 })
        );
    }

    #[test]
    fn test_sharpe_and_volatility() {
        let navs = [1.0, 1.01, 0.999, 1.02, 1.015, 1.03];
        let metrics = compute(&series(&navs), 0.02).unwrap();

        let returns = daily_returns(&navs);
        let mean = returns.iter().sum::<f64>() / 5.0;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 4.0;
        let vol = var.sqrt() * 252f64.sqrt();

        assert_relative_eq!(metrics.annualized_volatility, vol, max_relative = 1e-12);
        assert_relative_eq!(
            metrics.sharpe.value().unwrap(),
            (mean * 252.0 - 0.02) / vol,
            max_relative = 1e-12
        );
        assert_abs_diff_eq!(metrics.total_return, 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_unordered_series_rejected() {
        let mut obs = series(&[1.0, 1.1, 1.2]);
        obs.swap(1, 2);
        assert!(matches!(compute(&obs, 0.02), Err(MetricsError::Unordered { .. })));
    }

    #[test]
    fn test_invalid_nav_rejected() {
        let obs = series(&[1.0, 0.0, 1.2]);
        assert!(matches!(compute(&obs, 0.02), Err(MetricsError::InvalidNav { .. })));
    }

    #[test]
    fn test_trailing_window() {
        let obs = series(&[1.0, 1.1, 1.2, 1.3]);
        assert_eq!(trailing_window(&obs, 2).len(), 2);
        assert_eq!(trailing_window(&obs, 2)[0].nav, 1.2);
        assert_eq!(trailing_window(&obs, 10).len(), 4);
    }
}
