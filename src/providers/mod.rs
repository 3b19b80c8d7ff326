pub mod eastmoney;
pub mod sina;
pub mod util;
pub mod yahoo;

use crate::core::config::{AppConfig, ProviderKind};
use crate::core::nav::NavHistoryProvider;
use crate::core::quote::QuoteProvider;
use std::sync::Arc;
use std::time::Duration;

/// Quote providers in configured failover order.
pub fn build_quote_providers(config: &AppConfig) -> Vec<Arc<dyn QuoteProvider>> {
    let client = util::http_client(Duration::from_millis(config.quotes.request_timeout_ms));
    config
        .providers
        .iter()
        .map(|provider| -> Arc<dyn QuoteProvider> {
            match provider.kind {
                ProviderKind::Sina => Arc::new(sina::SinaProvider::new(
                    &provider.base_url,
                    client.clone(),
                )),
                ProviderKind::Yahoo => Arc::new(yahoo::YahooProvider::new(
                    &provider.base_url,
                    client.clone(),
                )),
            }
        })
        .collect()
}

/// NAV history downloads are large, so they get a longer timeout than quotes.
pub fn build_nav_provider(config: &AppConfig) -> Arc<dyn NavHistoryProvider> {
    let client = util::http_client(Duration::from_secs(30));
    Arc::new(eastmoney::EastmoneyProvider::new(
        &config.nav_provider.base_url,
        client,
    ))
}
