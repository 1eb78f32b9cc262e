//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Standby monitor deciding promotion and demotion."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_dbd_common::config::BackupConfig;
use r_dbd_common::time::duration_to_millis;
use r_dbd_metrics::FailoverMetrics;
use r_dbd_rt::ShutdownSignal;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, MonitorAddress, ResolvedAddress};
use crate::poller::{poll, PollOutcome};
use crate::role::{Role, SharedRole};

/// One-way notifications the controller sends to the rest of the daemon when
/// it gives up the active role. Implementations must return quickly; errors
/// are logged and the transition proceeds regardless.
pub trait FailoverHooks: Send + Sync {
    /// Wake the request engine so it re-reads the role and stops serving.
    fn notify_request_engine_role_changed(&self) -> anyhow::Result<()>;

    /// Stop this instance's periodic usage rollup.
    fn cancel_periodic_aggregation(&self) -> anyhow::Result<()>;
}

/// Timing knobs for the standby monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverSettings {
    /// Budget for one heartbeat window.
    pub heartbeat_timeout: Duration,
    /// Bound on establishing the monitoring connection.
    pub connect_timeout: Duration,
    /// Pause between iterations.
    pub throttle: Duration,
    /// Delay before the first heartbeat.
    pub startup_grace: Duration,
}

impl FailoverSettings {
    pub fn from_config(config: &BackupConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            connect_timeout: config.connect_timeout,
            throttle: config.throttle,
            startup_grace: config.startup_grace,
        }
    }
}

/// Watches the primary and moves this instance between standby and active.
///
/// [`FailoverController::run`] is the monitoring loop. It returns when this
/// instance promotes itself or when shutdown is requested; callers tell the
/// two apart through the shared role and the shutdown signal. The connection
/// is closed on every exit path.
pub struct FailoverController {
    address: MonitorAddress,
    settings: FailoverSettings,
    role: SharedRole,
    shutdown: ShutdownSignal,
    hooks: Arc<dyn FailoverHooks>,
    metrics: Option<FailoverMetrics>,
    connection: ConnectionManager,
}

impl FailoverController {
    pub fn new(
        address: MonitorAddress,
        settings: FailoverSettings,
        role: SharedRole,
        shutdown: ShutdownSignal,
        hooks: Arc<dyn FailoverHooks>,
    ) -> Self {
        Self {
            address,
            connection: ConnectionManager::new(settings.connect_timeout),
            settings,
            role,
            shutdown,
            hooks,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: FailoverMetrics) -> Self {
        metrics.set_active(self.role.is_active());
        self.metrics = Some(metrics);
        self
    }

    pub fn role(&self) -> &SharedRole {
        &self.role
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub async fn run(&mut self) {
        info!(
            primary = %self.address,
            role = %self.role.get(),
            heartbeat_timeout_ms = duration_to_millis(self.settings.heartbeat_timeout),
            "standby monitor starting"
        );

        if !self.settings.startup_grace.is_zero()
            && !self.shutdown.sleep(self.settings.startup_grace).await
        {
            self.finish();
            return;
        }

        let resolved = self.address.resolve().await;
        self.connect(&resolved).await;

        let timeout_ms = duration_to_millis(self.settings.heartbeat_timeout);
        while !self.shutdown.is_triggered() {
            let outcome = poll(&self.connection, timeout_ms, &self.shutdown).await;
            if self.shutdown.is_triggered() {
                break;
            }
            debug!(outcome = outcome.label(), role = %self.role.get(), "heartbeat");
            if let Some(metrics) = &self.metrics {
                metrics.record_poll(outcome.label());
            }

            let readable = outcome.is_readable();
            match (self.role.get(), readable) {
                (Role::Active, true) => self.demote(),
                (Role::Standby, false) => {
                    self.promote(outcome);
                    break;
                }
                _ => {}
            }

            if !self.shutdown.sleep(self.settings.throttle).await {
                break;
            }
            if !readable {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_reconnect();
                }
                self.connect(&resolved).await;
            }
        }

        self.finish();
    }

    /// (Re)open the connection, abandoning the attempt if shutdown arrives first.
    async fn connect(&mut self, address: &ResolvedAddress) {
        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => {
                self.connection.close();
                return;
            }
            result = self.connection.reopen(address) => result,
        };
        if let Err(err) = result {
            err.log();
        }
    }

    fn promote(&self, outcome: PollOutcome) {
        self.role.set(Role::Active);
        warn!(
            primary = %self.address,
            outcome = outcome.label(),
            transition_event = true,
            "primary unreachable; assuming control"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_transition("promotion");
            metrics.set_active(true);
        }
    }

    fn demote(&self) {
        // Publish the new role before waking anyone so woken subsystems see it.
        self.role.set(Role::Standby);
        info!(
            primary = %self.address,
            transition_event = true,
            "primary has resumed; yielding control"
        );
        if let Err(err) = self.hooks.notify_request_engine_role_changed() {
            warn!(error = %err, "failed to wake request engine; continuing demotion");
        }
        if let Err(err) = self.hooks.cancel_periodic_aggregation() {
            warn!(error = %err, "failed to cancel usage rollup; continuing demotion");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_transition("demotion");
            metrics.set_active(false);
        }
    }

    fn finish(&mut self) {
        self.connection.close();
        info!(
            role = %self.role.get(),
            shutdown = self.shutdown.is_triggered(),
            "standby monitor stopped"
        );
    }
}
