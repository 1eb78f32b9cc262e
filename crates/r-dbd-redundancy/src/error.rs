//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Failure taxonomy for the standby monitor."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::Ready;
use tracing::{debug, error};

/// Failures while opening the monitoring connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The configured endpoint cannot be dialled (zero port or unresolvable host).
    #[error("invalid monitor address {address}: {reason}")]
    AddressInvalid {
        address: String,
        reason: &'static str,
    },
    /// The transport refused or failed the connect.
    #[error("failed to connect to primary at {address}: {source}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The connect did not complete within the configured bound.
    #[error("connect to primary at {address} timed out after {timeout:?}")]
    ConnectTimeout { address: SocketAddr, timeout: Duration },
}

/// Reasons a heartbeat poll did not observe a readable connection.
///
/// Every variant except [`PollFailure::Interrupted`] folds into
/// `PollOutcome::ConnectionError`.
#[derive(Debug, thiserror::Error)]
pub enum PollFailure {
    /// The readiness wait was interrupted by a benign signal; retried silently.
    #[error("readiness wait interrupted")]
    Interrupted,
    /// The readiness wait itself failed.
    #[error("readiness wait failed: {0}")]
    Fatal(#[source] io::Error),
    /// The primary closed its side of the connection.
    #[error("primary connection closed")]
    RemoteClosed,
    /// No usable descriptor is held, or the socket rejected inspection.
    #[error("primary connection is invalid: {0}")]
    RemoteInvalid(String),
    /// The socket reported a pending error condition.
    #[error("primary connection experienced an error: {0}")]
    RemoteErrored(String),
    /// Readiness was reported for something other than input.
    #[error("primary connection reported unexpected readiness {0:?}")]
    Unexpected(Ready),
}

impl PollFailure {
    /// Emit the failure at the severity operators expect for it.
    pub fn log(&self) {
        match self {
            PollFailure::Interrupted => {}
            PollFailure::RemoteClosed => debug!(error = %self, "heartbeat poll failed"),
            _ => error!(error = %self, "heartbeat poll failed"),
        }
    }
}

impl ConnectionError {
    pub fn log(&self) {
        error!(error = %self, "monitoring connection unavailable");
    }
}
