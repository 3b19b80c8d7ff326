pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::cache::QuoteCache;
use crate::core::calendar::TradingWindow;
use crate::core::config::AppConfig;
use crate::core::engine::ValuationEngine;
use crate::core::nav::NavHistoryProvider;
use crate::core::quote_source::{FetchPolicy, QuoteSource};
use crate::core::valuation::Aggregator;
use crate::store::memory::MemoryStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub enum AppCommand {
    Estimate,
    Metrics { window: Option<usize> },
    SyncNav,
    Run,
}

/// Wired components shared by the commands.
pub struct App {
    pub config: AppConfig,
    pub engine: Arc<ValuationEngine>,
    pub window: TradingWindow,
    pub nav_provider: Arc<dyn NavHistoryProvider>,
}

impl App {
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let holdings = Arc::new(MemoryStore::from_fund_configs(&config.funds));
        let navs = store::open_nav_store(&config)?;

        let cache = Arc::new(QuoteCache::new(Duration::from_secs(
            config.quotes.cache_ttl_secs,
        )));
        let quotes = QuoteSource::new(
            providers::build_quote_providers(&config),
            cache,
            FetchPolicy::from(&config.quotes),
        );
        let engine = ValuationEngine::new(
            holdings,
            navs,
            quotes,
            Aggregator::new(config.valuation.completeness_threshold),
            config.valuation.min_weight,
        );

        Ok(Self {
            window: TradingWindow::from_config(&config.schedule)?,
            nav_provider: providers::build_nav_provider(&config),
            engine: Arc::new(engine),
            config,
        })
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fundval starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::from_config(config)?;
    match command {
        AppCommand::Estimate => cli::estimate::run(&app).await,
        AppCommand::Metrics { window } => cli::metrics::run(&app, window).await,
        AppCommand::SyncNav => cli::sync::run(&app).await,
        AppCommand::Run => cli::run::run(&app).await,
    }
}
