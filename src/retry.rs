//! Support utilities for [`backoff`]'s retry API.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::StatusCode;

/// Build the backoff policy we use for network calls.
pub fn network_backoff(max_elapsed: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(max_elapsed))
        .build()
}

/// Classify an error as [`backoff::Error::transient`] or
/// [`backoff::Error::permanent`], depending on the return value of
/// [`IsKnownTransient::is_known_transient`].
pub fn classify<E>(error: E) -> backoff::Error<anyhow::Error>
where
    E: IsKnownTransient + Into<anyhow::Error>,
{
    if error.is_known_transient() {
        tracing::debug!("Potentially transient error, will retry");
        backoff::Error::transient(error.into())
    } else {
        backoff::Error::permanent(error.into())
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they've been observed
/// in the wild, investigated and determined to be transient. This prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else if self.is_decode() || self.is_builder() {
            // A malformed response body or request will not get better.
            false
        } else {
            // Connection failures, timeouts and the like.
            true
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}
