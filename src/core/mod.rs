//! Core business logic abstractions

pub mod cache;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod metrics;
pub mod model;
pub mod nav;
pub mod quote;
pub mod quote_source;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod valuation;

// Re-export main types for cleaner imports
pub use error::{MetricsError, QuoteError, ValuationError};
pub use model::{EstimatedValuation, Fund, FundKind, Holding, Market, NavObservation, Quote, Symbol};
pub use nav::NavHistoryProvider;
pub use quote::QuoteProvider;
pub use store::{HoldingsStore, NavStore};
