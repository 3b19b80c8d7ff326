//! Quote provider abstraction

use crate::core::error::QuoteError;
use crate::core::model::{Market, Quote, Symbol};
use async_trait::async_trait;

/// A source of live quotes. Implementations normalize their wire format into
/// [`Quote`].
///
/// `fetch` returning `Err` fails the whole call; symbols missing from an `Ok`
/// result are treated as unknown to this provider.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn id(&self) -> &str;

    fn supports(&self, _market: Market) -> bool {
        true
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, QuoteError>;
}
