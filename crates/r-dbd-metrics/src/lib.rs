//! ---
//! dbd_section: "03-persistence-logging"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Metrics collection and export utilities."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;
    let addr = listener.local_addr().unwrap_or(addr);

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    rollup_passes: IntCounter,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_dbdd_starts_total",
            "Total number of times the R-DBD daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_dbdd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let rollup_passes = IntCounter::with_opts(Opts::new(
            "r_dbd_rollup_passes_total",
            "Usage rollup passes executed while holding the active role",
        ))?;
        registry.register(Box::new(rollup_passes.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            rollup_passes,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn inc_rollup_pass(&self) {
        self.rollup_passes.inc();
    }
}

/// Metrics describing the standby monitor and its role transitions.
#[derive(Clone, Debug)]
pub struct FailoverMetrics {
    registry: SharedRegistry,
    role_active: IntGauge,
    transitions: IntCounterVec,
    poll_outcomes: IntCounterVec,
    reconnects: IntCounter,
}

impl FailoverMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let role_active = IntGauge::with_opts(Opts::new(
            "r_dbd_role_active",
            "Indicator (0/1) whether this instance currently holds the active role",
        ))?;
        registry.register(Box::new(role_active.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "r_dbd_role_transitions_total",
                "Role transitions performed by the standby monitor",
            ),
            &["direction"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let poll_outcomes = IntCounterVec::new(
            Opts::new(
                "r_dbd_poll_outcomes_total",
                "Heartbeat poll outcomes observed on the monitoring connection",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(poll_outcomes.clone()))?;

        let reconnects = IntCounter::with_opts(Opts::new(
            "r_dbd_monitor_reconnects_total",
            "Times the monitoring connection was reopened after a failed heartbeat",
        ))?;
        registry.register(Box::new(reconnects.clone()))?;

        Ok(Self {
            registry,
            role_active,
            transitions,
            poll_outcomes,
            reconnects,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_active(&self, active: bool) {
        self.role_active.set(if active { 1 } else { 0 });
    }

    pub fn record_transition(&self, direction: &str) {
        self.transitions.with_label_values(&[direction]).inc();
    }

    pub fn record_poll(&self, outcome: &str) {
        self.poll_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn inc_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn transitions(&self, direction: &str) -> u64 {
        self.transitions.with_label_values(&[direction]).get()
    }

    pub fn polls(&self, outcome: &str) -> u64 {
        self.poll_outcomes.with_label_values(&[outcome]).get()
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.get()
    }

    pub fn is_active(&self) -> bool {
        self.role_active.get() == 1
    }
}

pub use prometheus;
