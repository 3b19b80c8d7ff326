//! Error taxonomies of the quote layer, the metrics engine and the valuation tick.

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Failures of a quote provider call or of a whole symbol lookup.
///
/// Each variant maps to a [`Penalty`] through [`QuoteError::penalty`], which
/// decides how the quote source treats the provider on later calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    /// Transport error, timeout or server-side failure. Transient.
    #[error("Provider unavailable: {provider} - {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// The provider signaled throttling.
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// No provider and no cache entry could produce a quote.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
}

/// How a provider failure affects the provider's availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Penalty {
    /// No effect on future calls.
    None,
    /// Exponential backoff, growing with consecutive failures.
    Backoff,
    /// Fixed cool-down window, using the provider's hint when it gave one.
    CoolDown(Option<Duration>),
}

impl QuoteError {
    pub fn penalty(&self) -> Penalty {
        match self {
            Self::ProviderUnavailable { .. } => Penalty::Backoff,
            Self::RateLimited { retry_after, .. } => Penalty::CoolDown(*retry_after),
            Self::SymbolNotFound(_) => Penalty::None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Insufficient data: {observations} observation(s), at least 2 required")]
    InsufficientData { observations: usize },

    #[error("NAV series is not in ascending date order at {date}")]
    Unordered { date: NaiveDate },

    #[error("Invalid NAV {nav} on {date}")]
    InvalidNav { date: NaiveDate, nav: f64 },
}

#[derive(Error, Debug)]
pub enum ValuationError {
    /// Isolated per-fund failure during a tick.
    #[error("Valuation failed for fund {fund}: {reason}")]
    FundValuationFailed { fund: String, reason: String },

    #[error("Holding weights of fund {fund} sum to {total:.6}, above 1.0")]
    WeightsExceedOne { fund: String, total: f64 },

    #[error("Invalid weight {weight} for {symbol} in fund {fund}")]
    InvalidWeight {
        fund: String,
        symbol: String,
        weight: f64,
    },
}

impl ValuationError {
    pub fn failed(fund: &str, reason: impl std::fmt::Display) -> Self {
        Self::FundValuationFailed {
            fund: fund.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_unavailable_backs_off() {
        let error = QuoteError::ProviderUnavailable {
            provider: "sina".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(error.penalty(), Penalty::Backoff);
    }

    #[test]
    fn test_rate_limited_cools_down() {
        let error = QuoteError::RateLimited {
            provider: "yahoo".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(
            error.penalty(),
            Penalty::CoolDown(Some(Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_symbol_not_found_has_no_penalty() {
        let error = QuoteError::SymbolNotFound("600519.SH".to_string());
        assert_eq!(error.penalty(), Penalty::None);
    }

    #[test]
    fn test_error_display() {
        let error = QuoteError::SymbolNotFound("00700.HK".to_string());
        assert_eq!(error.to_string(), "Symbol not found: 00700.HK");

        let error = QuoteError::ProviderUnavailable {
            provider: "sina".to_string(),
            message: "timed out after 3s".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Provider unavailable: sina - timed out after 3s"
        );

        let error = ValuationError::failed("110011", "holdings store offline");
        assert_eq!(
            error.to_string(),
            "Valuation failed for fund 110011: holdings store offline"
        );
    }
}
