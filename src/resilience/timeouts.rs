//! Timeout enforcement.
//!
//! Timed-out backend calls surface as 504 Gateway Timeout.

use std::future::Future;
use std::time::Duration;

/// Marker for an elapsed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {0:?} elapsed")]
pub struct Elapsed(pub Duration);

/// Run `fut` with a deadline; the future is dropped (and its I/O abandoned) on expiry.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}
