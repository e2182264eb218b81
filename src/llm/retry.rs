// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for non-streaming vendor calls with exponential backoff
//!
//! Completion sessions never retry on their own; this is used for model
//! listing and other one-shot requests.

use crate::config::settings::ResilienceConfig;
use crate::error::{ApiError, Result, WardenError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration with smart defaults
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay in milliseconds (exponentially increased)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter percentage (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<ResilienceConfig> for RetryConfig {
    fn from(config: ResilienceConfig) -> Self {
        Self::from(&config)
    }
}

impl From<&ResilienceConfig> for RetryConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number
    fn calculate_delay(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let exponential_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped_ms = exponential_ms.min(self.max_delay_ms);

        let jitter_range = (capped_ms as f64 * self.jitter) as i64;
        let jitter_ms = if jitter_range > 0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0
        };

        let final_ms = (capped_ms as i64 + jitter_ms).max(0) as u64;
        Duration::from_millis(final_ms)
    }

    /// Delay before the next attempt, honouring a vendor Retry-After up to the cap
    fn delay_for(&self, attempt: u32, error: &WardenError) -> Duration {
        let backoff = self.calculate_delay(attempt);
        match error {
            WardenError::Api(ApiError::RateLimited(secs)) => {
                let requested = Duration::from_secs(u64::from(*secs))
                    .min(Duration::from_millis(self.max_delay_ms));
                backoff.max(requested)
            }
            _ => backoff,
        }
    }
}

/// Determine if an error is retryable
pub fn is_retryable(error: &WardenError) -> bool {
    match error {
        WardenError::Api(api_error) => match api_error {
            // Retry on transient failures
            ApiError::Transport(_) => true,
            ApiError::RateLimited(_) => true,
            ApiError::Timeout => true,
            ApiError::ServerError { status, .. } => (500..600).contains(status),

            // Don't retry on client or protocol errors
            ApiError::Unauthorized(_) => false,
            ApiError::ModelNotFound(_) => false,
            ApiError::Decode(_) => false,
            ApiError::ToolProtocolViolation(_) => false,
        },
        WardenError::Http(err) => err.is_connect() || err.is_timeout(),
        _ => false,
    }
}

/// Retry a function with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `config` - Retry configuration (uses default if None)
/// * `operation_name` - Name of the operation for logging
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    config: Option<RetryConfig>,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let config = config.unwrap_or_default();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(
                        target: "warden.retry",
                        operation = operation_name,
                        attempts = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    tracing::debug!(
                        target: "warden.retry",
                        operation = operation_name,
                        error = %error,
                        "non-retryable error"
                    );
                    return Err(error);
                }

                if attempt >= config.max_retries {
                    tracing::warn!(
                        target: "warden.retry",
                        operation = operation_name,
                        retries = config.max_retries,
                        error = %error,
                        "retries exhausted"
                    );
                    return Err(error);
                }

                let delay = config.delay_for(attempt, &error);
                tracing::warn!(
                    target: "warden.retry",
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter: 0.0,
        }
    }

    fn transport() -> WardenError {
        WardenError::Api(ApiError::Transport("connection reset".to_string()))
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 16000);
        assert!((config.jitter - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_retry_config_from_resilience() {
        let resilience = ResilienceConfig {
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 400,
            jitter: 0.1,
            ..ResilienceConfig::default()
        };
        let config = RetryConfig::from(resilience);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 50);
        assert_eq!(config.max_delay_ms, 400);
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let delays: Vec<u128> = (0..6)
            .map(|attempt| fast(5).calculate_delay(attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100, 100]);
        assert_eq!(fast(100).calculate_delay(90).as_millis(), 100);

        let jittered = RetryConfig {
            jitter: 0.5,
            ..fast(5)
        };
        for _ in 0..20 {
            let millis = jittered.calculate_delay(0).as_millis();
            assert!((5..=15).contains(&millis), "{}", millis);
        }
    }

    #[test]
    fn test_rate_limit_delay_honours_retry_after_up_to_cap() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 2000,
            jitter: 0.0,
        };
        let limited = WardenError::Api(ApiError::RateLimited(1));
        assert_eq!(config.delay_for(0, &limited).as_millis(), 1000);

        let long = WardenError::Api(ApiError::RateLimited(60));
        assert_eq!(config.delay_for(0, &long).as_millis(), 2000);

        assert_eq!(config.delay_for(0, &transport()).as_millis(), 10);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&transport()));
        assert!(is_retryable(&WardenError::Api(ApiError::RateLimited(60))));
        assert!(is_retryable(&WardenError::Api(ApiError::Timeout)));
        assert!(is_retryable(&WardenError::Api(ApiError::ServerError {
            status: 503,
            message: "overloaded".to_string(),
        })));

        assert!(!is_retryable(&WardenError::Api(ApiError::Unauthorized(
            "bad key".to_string()
        ))));
        assert!(!is_retryable(&WardenError::Api(ApiError::ModelNotFound(
            "model".to_string()
        ))));
        assert!(!is_retryable(&WardenError::Api(ApiError::Decode(
            "bad json".to_string()
        ))));
        assert!(!is_retryable(&WardenError::Api(
            ApiError::ToolProtocolViolation("dup".to_string())
        )));
        assert!(!is_retryable(&WardenError::Config("config error".to_string())));
    }

    #[test]
    fn test_is_retryable_server_error_boundaries() {
        let server = |status| {
            WardenError::Api(ApiError::ServerError {
                status,
                message: String::new(),
            })
        };
        assert!(is_retryable(&server(500)));
        assert!(is_retryable(&server(599)));
        assert!(!is_retryable(&server(499)));
        assert!(!is_retryable(&server(600)));
    }

    /// Run `with_retry` over scripted attempt results; returns the result and attempt count
    async fn scripted(
        attempts: Vec<Result<u32>>,
        config: RetryConfig,
    ) -> (Result<u32>, usize) {
        let script = Mutex::new(attempts.into_iter());
        let calls = AtomicUsize::new(0);
        let result = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let next = script
                    .lock()
                    .unwrap()
                    .next()
                    .unwrap_or_else(|| Err(transport()));
                async move { next }
            },
            Some(config),
            "list models (test)",
        )
        .await;
        (result, calls.into_inner())
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_failures() {
        let (result, calls) = scripted(
            vec![
                Err(transport()),
                Err(WardenError::Api(ApiError::ServerError {
                    status: 502,
                    message: "bad gateway".to_string(),
                })),
                Ok(7),
            ],
            fast(5),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_unauthorized() {
        let (result, calls) = scripted(
            vec![Err(WardenError::Api(ApiError::Unauthorized(
                "invalid key".to_string(),
            )))],
            fast(5),
        )
        .await;
        assert!(matches!(
            result,
            Err(WardenError::Api(ApiError::Unauthorized(_)))
        ));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_retries() {
        let (result, calls) = scripted(Vec::new(), fast(2)).await;
        assert!(result.is_err());
        assert_eq!(calls, 3);

        let (_, calls) = scripted(Vec::new(), fast(0)).await;
        assert_eq!(calls, 1);
    }
}
