//! Periodic archive runs
//!
//! Each tick spawns an independent run; a tick that lands while the previous
//! run still holds the table lock is logged and skipped. Errors never stop
//! the loop, only the shutdown token does. On shutdown the in-flight runs are
//! cancelled and awaited so their reports are logged.

use crate::app::AppContext;
use crate::error::ArchiveError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Scheduler {
    ctx: Arc<AppContext>,
    period: Duration,
    run_on_init: bool,
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>, period: Duration, run_on_init: bool) -> Self {
        Self {
            ctx,
            period,
            run_on_init,
        }
    }

    pub fn from_context(ctx: Arc<AppContext>) -> Self {
        let settings = &ctx.config().scheduler;
        let period = Duration::from_secs(settings.interval_minutes * 60);
        let run_on_init = settings.run_on_init;
        Self::new(ctx, period, run_on_init)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let first = if self.run_on_init {
            Instant::now()
        } else {
            Instant::now() + self.period
        };
        let mut ticker = interval_at(first, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Scheduler started: every {}s, run_on_init={}",
            self.period.as_secs(),
            self.run_on_init
        );

        let mut sweeps = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    Self::spawn_sweep(&mut sweeps, Arc::clone(&self.ctx), shutdown.child_token());
                }
                Some(joined) = sweeps.join_next(), if !sweeps.is_empty() => {
                    Self::reap(joined);
                }
            }
        }

        if !sweeps.is_empty() {
            info!("Waiting for {} scheduled run(s) to wind down", sweeps.len());
        }
        while let Some(joined) = sweeps.join_next().await {
            Self::reap(joined);
        }
    }

    fn spawn_sweep(sweeps: &mut JoinSet<()>, ctx: Arc<AppContext>, cancel: CancellationToken) {
        sweeps.spawn(async move {
            let started = Utc::now();
            info!("⏰ Scheduled archive run starting at {}", started.to_rfc3339());
            sweep_once(&ctx, &cancel).await;
            info!("Scheduled archive run ended at {}", Utc::now().to_rfc3339());
        });
    }

    fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            error!("Scheduled run task aborted: {}", e);
        }
    }
}

/// One scheduled run; every failure is logged and left for the next tick
pub async fn sweep_once(ctx: &AppContext, cancel: &CancellationToken) {
    let archiver = match ctx.archiver().await {
        Ok(archiver) => archiver,
        Err(e) => {
            error!("Archiver unavailable, retrying on the next tick: {}", e);
            return;
        }
    };
    let request = ctx.policy().request_at(Utc::now());
    match archiver.run(&request, cancel).await {
        Ok(report) => info!("Scheduled run: {}", report.message()),
        Err(ArchiveError::RunInProgress(table)) => {
            warn!("Previous run on {} still in progress, skipping this tick", table)
        }
        Err(e) => error!("Scheduled run failed: {}", e),
    }
}
