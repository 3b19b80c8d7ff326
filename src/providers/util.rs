use crate::core::error::QuoteError;
use anyhow::Error;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; fundval/0.1)";

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(anyhow::Error::from) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Shared HTTP client with a request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            debug!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Maps a non-success HTTP status to a quote error. `Ok(())` means the
/// response can be read; `Err(None)` means the resource does not exist.
pub fn classify_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<(), Option<QuoteError>> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(Some(QuoteError::RateLimited {
                provider: provider.to_string(),
                retry_after,
            }))
        }
        StatusCode::NOT_FOUND => Err(None),
        _ => Err(Some(QuoteError::ProviderUnavailable {
            provider: provider.to_string(),
            message: format!("HTTP {status}"),
        })),
    }
}

/// Wraps a transport error.
pub fn transport_error(provider: &str, error: reqwest::Error) -> QuoteError {
    QuoteError::ProviderUnavailable {
        provider: provider.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_classify_status() {
        let mut headers = HeaderMap::new();
        assert_eq!(classify_status("sina", StatusCode::OK, &headers), Ok(()));
        assert_eq!(classify_status("sina", StatusCode::NOT_FOUND, &headers), Err(None));
        assert!(matches!(
            classify_status("sina", StatusCode::BAD_GATEWAY, &headers),
            Err(Some(QuoteError::ProviderUnavailable { .. }))
        ));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("45"));
        assert_eq!(
            classify_status("sina", StatusCode::TOO_MANY_REQUESTS, &headers),
            Err(Some(QuoteError::RateLimited {
                provider: "sina".to_string(),
                retry_after: Some(Duration::from_secs(45)),
            }))
        );
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let calls = AtomicUsize::new(0);
        let client = reqwest::Client::new();
        let result = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let request = client.get(server.uri()).send();
                async move { request.await?.error_for_status() }
            },
            2,
            1,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
