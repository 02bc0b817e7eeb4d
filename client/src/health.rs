//! Health gate: blocks callers until the sidecar's outbound health endpoint
//! reports ready, or a deadline is reached.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Polls the sidecar's HTTP health endpoint until it answers with a
/// successful status, or `deadline` elapses.
///
/// Safe to call concurrently and repeatedly; each call is an independent
/// poll loop with no shared state.
pub async fn wait_until_ready(envelope: &Envelope, deadline: Duration) -> Result<()> {
    let url = envelope.health_url();
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| Error::Connection(e.to_string()))?;

    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(attempt, "sidecar health check succeeded");
                return Ok(());
            }
            Ok(resp) => debug!(attempt, status = %resp.status(), "sidecar not ready yet"),
            Err(err) => debug!(attempt, error = %err, "sidecar health check failed"),
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return Err(Error::DeadlineExceeded(Some(deadline)));
        }

        let backoff = Duration::from_millis(100 * u64::from(attempt.min(10))).min(deadline - elapsed);
        tokio::time::sleep(backoff).await;
    }
}
