//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "binary"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Services the daemon runs while it holds the active role."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use r_dbd_common::DbdConfig;
use r_dbd_metrics::DaemonMetrics;
use r_dbd_redundancy::{FailoverHooks, HeartbeatResponder, SharedRole};
use r_dbd_rt::{RateLimiter, ShutdownSignal, TaskGroup};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Where the active services listen and how often the rollup runs.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub control: SocketAddr,
    pub rollup_interval: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &DbdConfig) -> Self {
        Self {
            control: config.control.listen,
            rollup_interval: config.rollup.interval,
        }
    }
}

/// Bridges controller notifications to the running services.
///
/// The wake goes to the control endpoint, which re-reads the role and closes
/// once it is no longer active. The rollup is stopped through its own signal
/// so it halts even while the rest of the group keeps running.
pub struct ServiceHooks {
    wake: Arc<Notify>,
    rollup: Mutex<Option<ShutdownSignal>>,
}

impl ServiceHooks {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            wake,
            rollup: Mutex::new(None),
        }
    }

    fn attach_rollup(&self, stop: ShutdownSignal) {
        if let Some(previous) = self.rollup.lock().replace(stop) {
            previous.trigger();
        }
    }
}

impl FailoverHooks for ServiceHooks {
    fn notify_request_engine_role_changed(&self) -> Result<()> {
        self.wake.notify_one();
        Ok(())
    }

    fn cancel_periodic_aggregation(&self) -> Result<()> {
        match self.rollup.lock().take() {
            Some(stop) => {
                stop.trigger();
                Ok(())
            }
            None => Err(anyhow!("no usage rollup is scheduled")),
        }
    }
}

/// The group of tasks that only run on the instance holding the active role.
pub struct ActiveServices {
    group: TaskGroup,
}

impl ActiveServices {
    pub async fn start(
        settings: ServiceSettings,
        role: SharedRole,
        wake: Arc<Notify>,
        hooks: &ServiceHooks,
        metrics: Option<DaemonMetrics>,
    ) -> Result<Self> {
        let mut group = TaskGroup::new("active-services");

        let rollup_stop = ShutdownSignal::new();
        hooks.attach_rollup(rollup_stop.clone());
        let interval = settings.rollup_interval;
        group
            .spawn_with("usage-rollup", move |cancel| {
                Ok(run_rollup(interval, cancel, rollup_stop, metrics))
            })
            .await?;

        group
            .spawn_with("control-endpoint", move |cancel| {
                let responder = HeartbeatResponder::bind(settings.control)?;
                Ok(responder.serve(role, wake, cancel))
            })
            .await?;

        info!(group = group.name(), members = group.len(), "active services started");
        Ok(Self { group })
    }

    /// Cancel every member and wait for them to finish.
    pub async fn stop(mut self) {
        self.group.shutdown().await;
        info!(group = self.group.name(), "active services stopped");
    }
}

async fn run_rollup(
    interval: Duration,
    cancel: ShutdownSignal,
    stop: ShutdownSignal,
    metrics: Option<DaemonMetrics>,
) -> Result<()> {
    let mut limiter = RateLimiter::new(interval);
    let mut passes: u64 = 0;
    info!(interval_secs = interval.as_secs(), "usage rollup scheduled");
    loop {
        tokio::select! {
            biased;
            _ = cancel.wait() => break,
            _ = stop.wait() => {
                info!(passes, "usage rollup cancelled");
                break;
            }
            _ = limiter.tick() => {
                passes += 1;
                debug!(pass = passes, "usage rollup pass");
                if let Some(metrics) = &metrics {
                    metrics.inc_rollup_pass();
                }
            }
        }
    }
    Ok(())
}
