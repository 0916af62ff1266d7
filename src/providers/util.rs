use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retries a request while it fails at the transport level (connect errors,
/// timeouts). HTTP status errors are returned immediately.
///
/// # Parameters
/// - `operation`: Closure returning the request future
/// - `retries`: Extra attempts after the first one
/// - `delay`: Pause between attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay: Duration,
) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) if attempt <= retries && (err.is_connect() || err.is_timeout()) => {
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt,
                    retries + 1,
                    err
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_connect_errors_are_retried() {
        let attempts = AtomicUsize::new(0);
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/");
        let result = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                reqwest::get(&url)
            },
            2,
            Duration::from_millis(1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
