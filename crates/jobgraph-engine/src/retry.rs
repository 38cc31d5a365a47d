//! Bounded retry for predicate calls.

use jobgraph_config::OptimizerSettings;
use jobgraph_core::{JobId, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Run `op`, retrying transient failures with exponential backoff.
///
/// At most `settings.retries` extra attempts are made; the delay starts at
/// `settings.backoff_ms` and doubles each time.
pub async fn retrying<T, F, Fut>(
    settings: &OptimizerSettings,
    job: &JobId,
    predicate: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < settings.retries => {
                let delay = settings.backoff_ms.saturating_mul(1u64 << attempt.min(16));
                attempt += 1;
                warn!(
                    job = %job,
                    predicate,
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "Predicate failed, retrying"
                );
                sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
