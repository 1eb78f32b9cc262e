//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Shared primitives and utilities for the daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
//! Shared primitives for the R-DBD workspace: configuration loading,
//! tracing setup, and deadline arithmetic for bounded waits.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    BackupConfig, ControlConfig, DbdConfig, LoadedDbdConfig, LoggingConfig, MetricsConfig, Mode,
    RollupConfig,
};
pub use logging::{init_tracing, LogFormat};
