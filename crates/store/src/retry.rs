use std::time::Duration;

use lakestore_protocol::Operation;
use lakestore_rest::{RestRequest, RestResponse, RestTransport};
use tracing::{debug, warn};

use crate::{LakePath, StoreError};

/// Upper bound of a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);

/// Exponential backoff for transient REST failures.
///
/// A call is attempted once and then retried up to `max_retries` times;
/// the delay before retry `n` (zero-based) is
/// `initial_delay * backoff_factor^n`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(10),
            backoff_factor: 3.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt and surfaces errors as-is.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }

    /// Performs `request`, retrying transient failures.
    ///
    /// Definitive errors (not found, permission, bad offset, other 4xx)
    /// come back on the first failure. Once the budget is spent the last
    /// transient error is wrapped in [`StoreError::MaxRetriesExceeded`].
    pub async fn call(
        &self,
        transport: &dyn RestTransport,
        request: RestRequest,
    ) -> Result<RestResponse, StoreError> {
        let mut attempt = 0u32;
        loop {
            match transport.call(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_transient() => return Err(e.into()),
                Err(e) if self.max_retries == 0 => return Err(e.into()),
                Err(e) if attempt >= self.max_retries => {
                    warn!(
                        op = %request.op,
                        path = %request.path,
                        attempts = attempt + 1,
                        error = %e,
                        "giving up after retries"
                    );
                    return Err(StoreError::MaxRetriesExceeded {
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        op = %request.op,
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Reads `length` bytes of `path` starting at `offset`.
///
/// The service may return fewer bytes than asked for; callers decide what
/// a short read means.
pub async fn fetch_range_with_retry(
    transport: &dyn RestTransport,
    retry: &RetryPolicy,
    path: &LakePath,
    offset: u64,
    length: u64,
    session_id: Option<&str>,
) -> Result<Vec<u8>, StoreError> {
    debug!(path = %path, offset, length, "fetch range");
    let mut request = RestRequest::new(Operation::Open, path.as_str())
        .param("offset", offset)
        .param("length", length)
        .param("read", "true");
    if let Some(id) = session_id {
        request = request.param("filesessionid", id);
    }
    Ok(retry.call(transport, request).await?.body)
}

/// Sends a `CREATE` or `APPEND` carrying data.
///
/// If the service rejects an append with a bad offset, the bytes may have
/// landed on an earlier attempt whose reply was lost. A zero-length append
/// at `offset + len` then decides it: success means the data is there.
pub async fn put_data_with_retry(
    transport: &dyn RestTransport,
    retry: &RetryPolicy,
    request: RestRequest,
) -> Result<(), StoreError> {
    debug!(op = %request.op, path = %request.path, bytes = request.body_len(), "put data");
    let sent = request.clone();
    match retry.call(transport, request).await {
        Ok(_) => Ok(()),
        Err(err @ StoreError::BadOffset { .. }) => {
            let Some(offset) = sent
                .get_param("offset")
                .and_then(|o| o.parse::<u64>().ok())
            else {
                return Err(err);
            };
            let next = offset + sent.body_len() as u64;
            let mut empty_append = sent;
            empty_append.body = Some(Vec::new());
            empty_append.params.retain(|(k, _)| k != "offset");
            empty_append.params.push(("offset".into(), next.to_string()));

            let path = empty_append.path.clone();
            match retry.call(transport, empty_append).await {
                Ok(_) => {
                    debug!(path = %path, offset = next, "earlier append had landed");
                    Ok(())
                }
                Err(_) => Err(err),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakestore_rest::{Fault, MemoryTransport};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 10);
        assert_eq!(p.initial_delay, Duration::from_millis(10));
        assert_eq!(p.backoff_factor, 3.0);
    }

    #[test]
    fn delays_strictly_increase() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(30));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(90));
        for n in 0..p.max_retries {
            assert!(p.delay_for_attempt(n + 1) > p.delay_for_attempt(n));
        }
    }

    #[test]
    fn delay_is_capped_for_large_attempts() {
        let p = RetryPolicy {
            max_retries: 50,
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay_for_attempt(45), MAX_RETRY_DELAY);
        assert_eq!(p.delay_for_attempt(u32::MAX), MAX_RETRY_DELAY);

        let huge = RetryPolicy {
            backoff_factor: 1e300,
            ..fast(3)
        };
        assert_eq!(huge.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(huge.delay_for_attempt(2), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_succeed() {
        let t = MemoryTransport::new();
        t.put_file("f", b"x".to_vec());
        t.fail_next(Operation::GetFileStatus, Fault::Unavailable, 3);

        let resp = fast(5)
            .call(&t, RestRequest::new(Operation::GetFileStatus, "f"))
            .await;
        assert!(resp.is_ok());
        assert_eq!(t.call_count(Operation::GetFileStatus), 4);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let t = MemoryTransport::new();
        t.put_file("f", b"x".to_vec());
        t.fail_next(Operation::GetFileStatus, Fault::Throttled, 100);

        let err = fast(3)
            .call(&t, RestRequest::new(Operation::GetFileStatus, "f"))
            .await
            .unwrap_err();
        match err {
            StoreError::MaxRetriesExceeded { attempts, source } => {
                assert_eq!(attempts, 4);
                assert_eq!(source.status(), Some(429));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.call_count(Operation::GetFileStatus), 4);
    }

    #[tokio::test]
    async fn not_found_and_permission_are_not_retried() {
        let t = MemoryTransport::new();
        let err = fast(5)
            .call(&t, RestRequest::new(Operation::GetFileStatus, "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(t.call_count(Operation::GetFileStatus), 1);

        t.put_file("f", b"x".to_vec());
        t.fail_next(Operation::Open, Fault::PermissionDenied, 1);
        let err = fast(5)
            .call(&t, RestRequest::new(Operation::Open, "f"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert_eq!(t.call_count(Operation::Open), 1);
    }

    #[tokio::test]
    async fn no_retry_surfaces_raw_error() {
        let t = MemoryTransport::new();
        t.put_file("f", b"x".to_vec());
        t.fail_next(Operation::Open, Fault::Unavailable, 1);
        let err = RetryPolicy::no_retry()
            .call(&t, RestRequest::new(Operation::Open, "f"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rest(ref e) if e.status() == Some(503)));
        assert_eq!(t.call_count(Operation::Open), 1);
    }

    #[tokio::test]
    async fn lost_append_response_recovers_through_empty_append() {
        let t = MemoryTransport::new();
        t.put_file("f", b"abc".to_vec());
        t.lose_append_responses(1);

        let request = RestRequest::new(Operation::Append, "f")
            .param("offset", 3)
            .body(b"defg".to_vec());
        put_data_with_retry(&t, &fast(3), request).await.unwrap();

        assert_eq!(t.file("f").unwrap(), b"abcdefg");
        let appends: Vec<_> = t
            .calls()
            .into_iter()
            .filter(|c| c.op == Operation::Append)
            .collect();
        assert_eq!(appends.len(), 3);
        assert_eq!(appends[2].body_len, 0);
        assert!(appends[2].params.contains(&("offset".into(), "7".into())));
    }

    #[tokio::test]
    async fn genuine_bad_offset_surfaces_original_error() {
        let t = MemoryTransport::new();
        t.put_file("f", b"abc".to_vec());

        let request = RestRequest::new(Operation::Append, "f")
            .param("offset", 10)
            .body(b"zz".to_vec());
        let err = put_data_with_retry(&t, &fast(3), request).await.unwrap_err();
        assert!(matches!(err, StoreError::BadOffset { .. }));
        assert_eq!(t.file("f").unwrap(), b"abc");
    }

    #[tokio::test]
    async fn fetch_range_returns_requested_bytes() {
        let t = MemoryTransport::new();
        t.put_file("f", b"0123456789".to_vec());
        let data = fetch_range_with_retry(&t, &fast(1), &LakePath::new("f"), 4, 3, Some("s1"))
            .await
            .unwrap();
        assert_eq!(data, b"456");
        let call = t.calls().pop().unwrap();
        assert!(call.params.contains(&("filesessionid".into(), "s1".into())));
    }
}
