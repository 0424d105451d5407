use std::future::Future;
use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::reclaimer::Reclaimer;

/// Run reclaimer passes every `cleaner.interval` until `shutdown` resolves.
///
/// The first pass starts immediately. A pass that exceeds
/// `cleaner.invocation_timeout` is abandoned; whatever it already deleted stays
/// deleted and the rest is picked up by the next pass. Overrunning passes
/// delay the next tick rather than stacking up.
pub async fn run_schedule<F>(reclaimer: Arc<Reclaimer>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let period = reclaimer.config().interval;
    let budget = reclaimer.config().invocation_timeout;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    tracing::info!(
        interval_secs = period.as_secs_f64(),
        timeout_secs = budget.as_secs_f64(),
        "Reclaimer schedule started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match timeout(budget, reclaimer.run()).await {
            Ok(Ok(result)) if !result.failed.is_empty() => {
                tracing::warn!(
                    run_id = result.run_id,
                    failed = result.failed.len(),
                    "Reclaimer pass left copies for the next run"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Reclaimer pass failed");
            }
            Err(_) => {
                reclaimer.metrics().record_run_failed();
                tracing::error!(
                    timeout_secs = budget.as_secs_f64(),
                    "Reclaimer pass exceeded its invocation timeout"
                );
            }
        }
    }

    tracing::info!("Reclaimer schedule stopped");
}
