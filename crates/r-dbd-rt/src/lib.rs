//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Runtime helpers supporting the daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
//! Runtime helpers for the R-DBD daemon.

pub mod scheduling;
pub mod shutdown;

pub use scheduling::{RateLimiter, TaskGroup};
pub use shutdown::ShutdownSignal;
