//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Bounded readiness polling used as the heartbeat."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
//! Heartbeat polling.
//!
//! Readability of the monitoring connection is the liveness signal: the
//! primary's control listener accepted us and is talking. Nothing is ever read
//! from the socket.

use std::io;
use std::time::Duration;

use r_dbd_common::time::{monotonic_now, remaining_millis, wait_duration};
use r_dbd_rt::ShutdownSignal;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tokio::time::error::Elapsed;
use tracing::{debug, trace};

use crate::connection::ConnectionManager;
use crate::error::PollFailure;

/// Result of a single heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Readable,
    TimedOut,
    ConnectionError,
}

impl PollOutcome {
    pub fn is_readable(self) -> bool {
        matches!(self, PollOutcome::Readable)
    }

    /// Stable label used for metrics and structured logs.
    pub fn label(self) -> &'static str {
        match self {
            PollOutcome::Readable => "readable",
            PollOutcome::TimedOut => "timed_out",
            PollOutcome::ConnectionError => "connection_error",
        }
    }
}

enum Step {
    Readable,
    TimedOut,
    Failed(PollFailure),
}

/// Wait up to `timeout_ms` for the monitoring connection to become readable.
///
/// The budget is recomputed on every pass, so an interrupted wait resumes
/// with whatever time is left and an exhausted budget turns into a single
/// non-blocking readiness check. Shutdown aborts the wait and reports
/// [`PollOutcome::ConnectionError`].
pub async fn poll(
    connection: &ConnectionManager,
    timeout_ms: i64,
    shutdown: &ShutdownSignal,
) -> PollOutcome {
    let Some(stream) = connection.stream() else {
        PollFailure::RemoteInvalid("no monitoring connection held".into()).log();
        return PollOutcome::ConnectionError;
    };

    let start = monotonic_now();
    while !shutdown.is_triggered() {
        let time_left = remaining_millis(timeout_ms, start);
        trace!(time_left_ms = time_left, "waiting for heartbeat");
        let waited = tokio::select! {
            biased;
            _ = shutdown.wait() => continue,
            waited = wait_readable(stream, wait_duration(time_left)) => waited,
        };
        match classify(stream, waited) {
            Step::Readable => return PollOutcome::Readable,
            Step::TimedOut => return PollOutcome::TimedOut,
            Step::Failed(PollFailure::Interrupted) => continue,
            Step::Failed(failure) => {
                failure.log();
                return PollOutcome::ConnectionError;
            }
        }
    }

    debug!("heartbeat poll abandoned for shutdown");
    PollOutcome::ConnectionError
}

async fn wait_readable(
    stream: &TcpStream,
    budget: Duration,
) -> Result<io::Result<Ready>, Elapsed> {
    tokio::time::timeout(budget, stream.ready(Interest::READABLE | Interest::ERROR)).await
}

fn classify(stream: &TcpStream, waited: Result<io::Result<Ready>, Elapsed>) -> Step {
    let ready = match waited {
        Err(_) => return Step::TimedOut,
        Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => {
            return Step::Failed(PollFailure::Interrupted)
        }
        Ok(Err(err)) => return Step::Failed(PollFailure::Fatal(err)),
        Ok(Ok(ready)) => ready,
    };

    if ready.is_read_closed() {
        return Step::Failed(PollFailure::RemoteClosed);
    }
    if ready.is_error() {
        let failure = match stream.take_error() {
            Ok(Some(err)) => PollFailure::RemoteErrored(err.to_string()),
            Ok(None) => PollFailure::RemoteErrored("error readiness without pending error".into()),
            Err(err) => PollFailure::RemoteInvalid(err.to_string()),
        };
        return Step::Failed(failure);
    }
    if !ready.is_readable() {
        return Step::Failed(PollFailure::Unexpected(ready));
    }
    Step::Readable
}
