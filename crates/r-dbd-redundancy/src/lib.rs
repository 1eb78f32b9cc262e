//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Active/standby failover for the accounting daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
//! Active/standby failover for the R-DBD daemon.
//!
//! A standby instance runs [`FailoverController`], which holds one connection
//! to the primary's control endpoint and treats its readability as the
//! primary's heartbeat. A failed heartbeat window promotes the standby; a
//! successful one while active hands control back.

mod connection;
mod controller;
mod error;
mod poller;
mod responder;
mod role;

pub use connection::{ConnectionManager, MonitorAddress, ResolvedAddress};
pub use controller::{FailoverController, FailoverHooks, FailoverSettings};
pub use error::{ConnectionError, PollFailure};
pub use poller::{poll, PollOutcome};
pub use responder::{HeartbeatResponder, HEARTBEAT_BYTE};
pub use role::{Role, SharedRole};
