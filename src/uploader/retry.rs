// SPDX-License-Identifier: Apache-2.0

use crate::uploader::client::ConnectError;
use crate::uploader::request::ApiRequest;
use crate::uploader::response::{ApiResponse, Verdict};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tower::BoxError;
use tower::retry::Policy;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Retries transport failures and retryable statuses with capped exponential
/// backoff. A fresh clone is used for every request, so `attempts` counts the
/// attempts of a single upload.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_backoff: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempts: 1,
        }
    }

    fn should_retry(&self, result: &Result<ApiResponse, BoxError>) -> bool {
        if self.attempts >= self.config.max_attempts {
            return false;
        }

        match result {
            // Timeouts, connection failures and any other transport error
            Err(_) => true,
            Ok(resp) => resp.verdict() == Verdict::Retry,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let backoff_ms = self.current_backoff.as_millis() as i64;

        // avoid div by zero
        let v = (backoff_ms / 2).max(1);

        // Exponential backoff with jitter
        let jitter = (rand::random::<i64>() % v) - (v / 2);
        let sleep_ms = (backoff_ms + jitter).max(1);

        self.current_backoff = std::cmp::min(self.current_backoff * 2, self.config.max_backoff);

        Duration::from_millis(sleep_ms as u64)
    }
}

impl Policy<ApiRequest, ApiResponse, BoxError> for RetryPolicy {
    type Future = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn retry(
        &mut self,
        _req: &mut ApiRequest,
        result: &mut Result<ApiResponse, BoxError>,
    ) -> Option<Self::Future> {
        if !self.should_retry(result) {
            return None;
        }

        let sleep_duration = self.next_delay();

        let reason = match result {
            Err(e) if e.downcast_ref::<tower::timeout::error::Elapsed>().is_some() => {
                "request timed out".to_string()
            }
            Err(e) if e.downcast_ref::<ConnectError>().is_some() => e.to_string(),
            Err(e) => format!("transport error: {}", e),
            Ok(resp) => format!("status {}", resp.status),
        };

        info!(
            attempt = self.attempts,
            delay = ?sleep_duration,
            reason,
            "Upload failed, will retry again after delay.",
        );

        self.attempts += 1;

        Some(Box::pin(async move {
            tokio::time::sleep(sleep_duration).await;
        }))
    }

    fn clone_request(&mut self, req: &ApiRequest) -> Option<ApiRequest> {
        Some(req.clone())
    }
}
