/// Periodic driver for the reminder jobs plus the write-trigger loop.
///
/// Each job gets its own interval loop. A loop awaits its scan before
/// waiting for the next tick, so two runs of the same job never overlap; a
/// scan that overruns its period just delays the next one.
///
/// A failed scan (store unavailable) is logged at error level and retried on
/// the next tick — there is no local retry.
///
/// Shutdown (Ctrl-C or SIGTERM) is only observed between ticks. A scan in
/// progress runs to completion, so every dispatched reminder has its
/// `notified` flag written before the process exits.
use crate::{
    config::AppConfig,
    flags,
    jobs::{Evaluator, Job},
    store::{DocumentStore, WriteEvents},
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub async fn job_loop(
    evaluator: Evaluator,
    job:       Job,
    period:    Duration,
    config:    AppConfig,
    cancel:    CancellationToken,
) {
    tracing::info!("{} job scheduled every {:?}", job, period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = evaluator.run(job, config.now()).await {
            tracing::error!("{} job failed: {}", job, e);
        }
    }
    tracing::info!("{} job stopped", job);
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.max(1) * 60)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Run both jobs and the flag controller until a shutdown signal arrives.
pub async fn run(
    config:    AppConfig,
    evaluator: Evaluator,
    store:     Arc<dyn DocumentStore>,
    events:    WriteEvents,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let controller = tokio::spawn(flags::run(store, events));

    let mut jobs = JoinSet::new();
    jobs.spawn(job_loop(
        evaluator.clone(),
        Job::Caffeine,
        minutes(config.caffeine.interval_minutes),
        config.clone(),
        cancel.clone(),
    ));
    jobs.spawn(job_loop(
        evaluator,
        Job::Hydration,
        minutes(config.hydration.interval_minutes),
        config,
        cancel.clone(),
    ));

    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("Shutdown requested — letting in-flight scans finish");
        }
        Some(joined) = jobs.join_next() => {
            // Job loops only return once cancelled.
            if let Err(e) = joined {
                tracing::error!("Reminder job ended unexpectedly: {}", e);
            } else {
                tracing::warn!("Reminder job ended unexpectedly");
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Reminder job failed during shutdown: {}", e);
        }
    }

    // The store keeps the trigger's sender alive, so the controller never
    // ends on its own.
    controller.abort();
    Ok(())
}
