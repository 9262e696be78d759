// src/services/llm_service.rs
//! Provider contract plus the HTTP plumbing the adapters share: client
//! construction, per-call timeouts, status classification and the image
//! retry loop.

use crate::errors::CollageError;
use crate::models::CanvasSpec;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Proxy, Response};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Lower bound for every provider timeout.
pub const MIN_TIMEOUT_MS: u64 = 1000;
const MAX_RETRIES: u32 = 6;
const MIN_RETRY_BASE_MS: u64 = 100;
const RETRY_JITTER_MS: u64 = 200;

/// Everything the planner sees about the request, minus the photos.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub prompt: String,
    pub style: String,
    pub template_id: Option<String>,
    pub photo_count: usize,
    pub canvas: CanvasSpec,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    /// Logical `WxH` size; adapters snap it to what their endpoint accepts.
    pub size: String,
    pub transparent: bool,
}

#[async_trait]
pub trait CollageProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Ask for a layout plan. Reference images are canonical PNG bytes in
    /// upload order. The returned object is untrusted.
    async fn plan_layout(
        &self,
        ctx: &PlanContext,
        reference_images: &[Vec<u8>],
    ) -> Result<Value, CollageError>;

    /// Generate one image and return its encoded bytes.
    async fn generate_image(&self, req: &ImageRequest) -> Result<Vec<u8>, CollageError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    base_delay_ms: u64,
    jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay_ms: u64) -> Self {
        Self {
            retries: retries.min(MAX_RETRIES),
            base_delay_ms: base_delay_ms.max(MIN_RETRY_BASE_MS),
            jitter_ms: RETRY_JITTER_MS,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// `base * 2^attempt + jitter`, with `attempt` counted from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };
        let backoff = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(MAX_RETRIES));
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 600)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable(err: &CollageError) -> bool {
    match err {
        CollageError::Network(_) | CollageError::Timeout(_) => true,
        CollageError::UpstreamHttp {
            status: Some(status),
            ..
        } => is_retryable_status(*status),
        _ => false,
    }
}

pub fn timeout_from_ms(ms: u64) -> Duration {
    Duration::from_millis(ms.max(MIN_TIMEOUT_MS))
}

/// Bound a provider call. Elapsing yields `Timeout`, never `Network`.
pub async fn with_timeout<T, F>(fut: F, limit: Duration, label: &str) -> Result<T, CollageError>
where
    F: Future<Output = Result<T, CollageError>>,
{
    let limit = limit.max(Duration::from_millis(MIN_TIMEOUT_MS));
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollageError::Timeout(format!(
            "{} timeout after {}ms",
            label,
            limit.as_millis()
        ))),
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are spent. `op` receives the zero-based attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, CollageError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CollageError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{} attempt {} failed ({}), retrying in {}ms",
                    label,
                    attempt + 1,
                    e.code(),
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn build_client(proxy: Option<&str>) -> Result<Client, CollageError> {
    let mut builder = Client::builder();
    if let Some(url) = proxy {
        let proxy = Proxy::all(url)
            .map_err(|e| CollageError::Validation(format!("Invalid proxy URL {}: {}", url, e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| CollageError::Network(format!("Failed to build HTTP client: {}", e)))
}

pub fn network_error(label: &str, e: reqwest::Error) -> CollageError {
    if e.is_timeout() {
        CollageError::Timeout(format!("{} timeout: {}", label, e))
    } else {
        CollageError::Network(format!("{} network error: {}", label, e))
    }
}

/// Read a response body, failing with `UpstreamHttp` on non-2xx statuses.
pub async fn read_text(response: Response, label: &str) -> Result<String, CollageError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| network_error(label, e))?;

    if !status.is_success() {
        return Err(CollageError::upstream(
            format!("{} error: {}", label, status),
            Some(status.as_u16()),
            Some(&text),
        ));
    }
    Ok(text)
}

pub async fn read_json(response: Response, label: &str) -> Result<Value, CollageError> {
    let text = read_text(response, label).await?;
    serde_json::from_str(&text).map_err(|_| {
        CollageError::upstream(
            format!("{}: invalid JSON response", label),
            None,
            Some(&text),
        )
    })
}

/// Parse a `WxH` size string. Both sides must be positive.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    #[test]
    fn retryable_statuses() {
        for s in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s));
        }
        for s in [200, 400, 401, 403, 404, 501] {
            assert!(!is_retryable_status(s));
        }
    }

    #[test]
    fn policy_is_clamped() {
        let p = RetryPolicy::new(50, 1);
        assert_eq!(p.retries(), MAX_RETRIES);
        assert_eq!(p.base_delay_ms, MIN_RETRY_BASE_MS);
    }

    #[test]
    fn delay_grows_exponentially_with_bounded_jitter() {
        let p = RetryPolicy::new(3, 600);
        for attempt in 0..3 {
            let d = p.delay_for(attempt).as_millis() as u64;
            let base = 600 * (1 << attempt);
            assert!(d >= base && d < base + RETRY_JITTER_MS, "attempt {}: {}ms", attempt, d);
        }
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1024x1400"), Some((1024, 1400)));
        assert_eq!(parse_size(" 512 X 256 "), Some((512, 256)));
        assert_eq!(parse_size("0x10"), None);
        assert_eq!(parse_size("2K"), None);
        assert_eq!(parse_size(""), None);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&instant_policy(3), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(CollageError::upstream("busy", Some(429), None)),
                    1 => Err(CollageError::Network("reset".into())),
                    _ => Ok(n),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retries_are_spent() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&instant_policy(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollageError::upstream("down", Some(503), None)) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), "UPSTREAM_HTTP_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&instant_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollageError::upstream("bad request", Some(400), None)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_is_its_own_error_kind() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CollageError>(())
        };
        let err = with_timeout(slow, Duration::from_millis(1), "chat")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.to_string().contains("chat timeout after 1000ms"));
    }

    #[test]
    fn timeouts_are_floored() {
        assert_eq!(timeout_from_ms(10), Duration::from_millis(MIN_TIMEOUT_MS));
        assert_eq!(timeout_from_ms(60_000), Duration::from_secs(60));
    }

    #[test]
    fn proxy_urls_are_validated() {
        assert!(build_client(None).is_ok());
        assert!(build_client(Some("http://127.0.0.1:7890")).is_ok());
    }
}
