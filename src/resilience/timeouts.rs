//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound each upstream call by the request deadline
//! - Bound the bodies the proxy drains (rejections, session replies)
//! - Bound a whole exchange (first attempt, reconnect, retry)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Relayed bodies stream to the client and are not cut
//! - A timed-out upstream call is a transport failure (503)

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::upstream::TransportError;

/// Upstream calls one exchange can make.
const CALLS_PER_EXCHANGE: u64 = 3;

/// Await `fut`, failing with [`TransportError::Timeout`] after `limit`.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(limit.as_secs()))
}

/// Deadline for reading an upstream body the proxy consumes itself.
pub fn body_deadline(config: &TimeoutConfig) -> Duration {
    Duration::from_secs(config.request_secs)
}

/// Outer deadline for a client request: forward, reconnect and retry.
pub fn exchange_deadline(config: &TimeoutConfig) -> Duration {
    Duration::from_secs(
        config
            .connect_secs
            .saturating_add(config.request_secs)
            .saturating_mul(CALLS_PER_EXCHANGE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_futures() {
        let value = with_deadline(Duration::from_secs(1), async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn times_out_slow_futures() {
        let err = with_deadline(
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(0)));
    }

    #[test]
    fn exchange_deadline_covers_three_calls() {
        let config = TimeoutConfig {
            connect_secs: 5,
            request_secs: 30,
        };
        assert_eq!(exchange_deadline(&config), Duration::from_secs(105));
    }
}
