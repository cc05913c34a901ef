//! Worker Supervision
//!
//! Background workers return `Result` instead of recovering from panics in
//! their own bodies. This module provides the outer supervisor that restarts
//! a failed worker with a growing backoff and keeps a restart count, so a
//! fixed-size worker pool does not silently shrink when one member dies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::shared::reporting::ErrorReporter;

/// Backoff ceiling between restarts.
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

/// Run a worker under supervision until it finishes cleanly or the token
/// fires.
///
/// The factory is invoked for every (re)start and must return a fresh worker
/// future. A worker that returns `Err` is reported and restarted after
/// `base_backoff * restarts` (capped at one minute); a worker that returns
/// `Ok(())` ends the supervision loop.
///
/// Workers are expected to watch the token themselves and return once it
/// fires; the supervisor never abandons a running worker mid-flight, it only
/// stops restarting.
pub async fn supervise<F, Fut>(
    name: &'static str,
    token: CancellationToken,
    reporter: Arc<dyn ErrorReporter>,
    base_backoff: Duration,
    factory: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut restarts: u32 = 0;

    loop {
        match factory().await {
            Ok(()) => {
                tracing::debug!(worker = name, restarts, "Worker finished");
                return;
            }
            Err(err) => {
                if token.is_cancelled() {
                    tracing::debug!(worker = name, "Supervision cancelled");
                    return;
                }

                restarts += 1;
                reporter.report(name, &err);

                let backoff = base_backoff
                    .saturating_mul(restarts)
                    .min(MAX_RESTART_BACKOFF);
                tracing::warn!(
                    worker = name,
                    restarts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Worker failed, restarting"
                );

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = token.cancelled() => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::reporting::test_support::RecordingReporter;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn restarts_failing_worker_until_cancelled() {
        let token = CancellationToken::new();
        let reporter = RecordingReporter::default();
        let attempts = Arc::new(Mutex::new(0u32));

        let worker_attempts = attempts.clone();
        let supervision = supervise(
            "flaky",
            token.clone(),
            Arc::new(reporter.clone()),
            Duration::from_millis(1),
            move || {
                let attempts = worker_attempts.clone();
                async move {
                    *attempts.lock() += 1;
                    anyhow::bail!("boom")
                }
            },
        );

        let guard = tokio::spawn(supervision);
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        guard.await.unwrap();

        let attempts = *attempts.lock();
        assert!(attempts >= 2, "expected restarts, got {attempts}");
        // The attempt in flight when cancellation lands is not reported
        let reports = reporter.reports.lock().len() as u32;
        assert!(reports >= attempts - 1 && reports <= attempts);
    }

    #[tokio::test]
    async fn clean_exit_stops_supervision() {
        let token = CancellationToken::new();
        let attempts = Arc::new(Mutex::new(0u32));

        let worker_attempts = attempts.clone();
        supervise(
            "oneshot",
            token,
            Arc::new(TracingReporterStub),
            Duration::from_millis(1),
            move || {
                let attempts = worker_attempts.clone();
                async move {
                    *attempts.lock() += 1;
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(*attempts.lock(), 1);
    }

    struct TracingReporterStub;

    impl ErrorReporter for TracingReporterStub {
        fn report(&self, _component: &str, _error: &dyn std::fmt::Display) {}
    }
}
