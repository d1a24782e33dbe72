//! Backoff for contended lock acquisition.
//!
//! A lost lock attempt is not an error, so the generic "retry on transient
//! error" pattern does not apply. [`retry_until_acquired`] instead repeats an
//! attempt that returns `Ok(false)` until it returns `Ok(true)`, an error, or
//! the policy runs out of attempts.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added so that workers
//!   that lost the same race do not retry in lockstep

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;

use crate::{config::LockRetryConfig, error::StorageResult};

/// Repeats `attempt` until it acquires, fails, or `policy` is exhausted.
pub(crate) async fn retry_until_acquired<F, Fut>(
    policy: &LockRetryConfig,
    mut attempt: F,
) -> StorageResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<bool>>,
{
    let attempts = policy.max_attempts.max(1);

    for n in 0..attempts {
        if attempt().await? {
            if n > 0 {
                tracing::debug!(attempt = n + 1, "lock acquired after retry");
            }
            return Ok(true);
        }

        if n + 1 < attempts {
            let delay = compute_backoff(policy, n);
            tracing::debug!(
                attempt = n + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "lock attempt lost, retrying after backoff",
            );
            fail_point!("lock-retry-before-sleep");
            tokio::time::sleep(delay).await;
        }
    }

    tracing::debug!(max_attempts = attempts, "lock retries exhausted");
    Ok(false)
}

/// Computes the delay before retry number `attempt + 1`.
pub(crate) fn compute_backoff(policy: &LockRetryConfig, attempt: u32) -> Duration {
    let base =
        policy.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(policy.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}
