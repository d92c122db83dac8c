//! Cron-driven backup jobs.
//!
//! Two fixed schedules: a nightly snapshot and a weekly retention prune,
//! both evaluated in the configured timezone. A failed run is logged and
//! not retried until the next scheduled tick; manual invocation through
//! the API is the recovery path.

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use std::sync::Arc;
use tracing::{error, info};

use super::{BackupEngine, SnapshotKind};

/// Spawn the nightly snapshot and weekly prune loops.
pub fn spawn_backup_jobs(
    engine: Arc<BackupEngine>,
    nightly: Schedule,
    prune: Schedule,
    timezone: FixedOffset,
    retention_days: u32,
) {
    info!(
        nightly = %nightly,
        prune = %prune,
        timezone = %timezone,
        retention_days = retention_days,
        "Starting backup scheduler"
    );

    let snapshot_engine = engine.clone();
    tokio::spawn(async move {
        run_on_schedule(nightly, timezone, "nightly snapshot", || {
            let engine = snapshot_engine.clone();
            async move {
                engine
                    .create_snapshot(SnapshotKind::Nightly)
                    .await
                    .map(|_| ())
            }
        })
        .await;
    });

    tokio::spawn(async move {
        run_on_schedule(prune, timezone, "retention prune", || {
            let engine = engine.clone();
            async move { engine.prune(retention_days).await.map(|_| ()) }
        })
        .await;
    });
}

/// Next tick of `schedule` in the given timezone, as a UTC instant.
fn next_tick(schedule: &Schedule, timezone: FixedOffset) -> Option<DateTime<Utc>> {
    schedule
        .upcoming(timezone)
        .next()
        .map(|t| t.with_timezone(&Utc))
}

async fn run_on_schedule<F, Fut>(schedule: Schedule, timezone: FixedOffset, job: &'static str, run: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), super::BackupError>>,
{
    loop {
        let Some(next) = next_tick(&schedule, timezone) else {
            error!(job = job, "Schedule yields no future ticks, stopping job");
            return;
        };
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;

        match run().await {
            Ok(()) => info!(job = job, "Scheduled run completed"),
            Err(e) => error!(job = job, error = %e, "Scheduled run failed, waiting for next tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::str::FromStr;

    #[test]
    fn next_tick_honors_the_configured_offset() {
        let schedule = Schedule::from_str("0 0 2 * * *").unwrap();

        let utc = FixedOffset::east_opt(0).unwrap();
        let athens = FixedOffset::east_opt(2 * 3600).unwrap();

        // 02:00 at UTC+2 is midnight UTC.
        let tick = next_tick(&schedule, athens).unwrap();
        assert_eq!(tick.hour(), 0);
        assert_eq!(tick.minute(), 0);

        let tick = next_tick(&schedule, utc).unwrap();
        assert_eq!(tick.hour(), 2);
    }

    #[test]
    fn next_tick_is_in_the_future() {
        let schedule = Schedule::from_str("0 30 2 * * Sun").unwrap();
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let tick = next_tick(&schedule, tz).unwrap();
        assert!(tick > Utc::now());
    }
}
