//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Runtime helpers supporting the daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::shutdown::ShutdownSignal;

/// Async rate limiter that keeps periodic jobs on a fixed cadence.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    /// The first tick fires one full `period` after construction.
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// A named set of cooperating tasks that share one cancellation signal.
///
/// Members are started one by one. When a member fails to start, every
/// sibling that is already running is cancelled and joined before the
/// failure is returned, so a half-started group never outlives its caller.
#[derive(Debug)]
pub struct TaskGroup {
    name: String,
    cancel: ShutdownSignal,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cancel: ShutdownSignal::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal shared by every member; members must return once it is set.
    pub fn cancel_signal(&self) -> ShutdownSignal {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start a member. `start` runs synchronously and may fail (binding a
    /// socket, for example); on success its future is spawned.
    pub async fn spawn_with<S, F>(&mut self, label: &str, start: S) -> Result<()>
    where
        S: FnOnce(ShutdownSignal) -> Result<F>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match start(self.cancel.clone()) {
            Ok(fut) => {
                debug!(group = %self.name, task = label, "task started");
                self.tasks.push((label.to_owned(), tokio::spawn(fut)));
                Ok(())
            }
            Err(err) => {
                warn!(
                    group = %self.name,
                    task = label,
                    started = self.tasks.len(),
                    error = %err,
                    "task failed to start; cancelling started siblings"
                );
                self.shutdown().await;
                Err(err.context(format!("task group {} failed to start {}", self.name, label)))
            }
        }
    }

    /// Cancel every member and wait for all of them to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.trigger();
        for (label, handle) in self.tasks.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(group = %self.name, task = %label, error = %err, "task exited with error");
                }
                Err(err) => {
                    error!(group = %self.name, task = %label, error = %err, "task join failure");
                }
            }
        }
    }

    /// Wait for every member to finish on its own, reporting the first failure.
    pub async fn join(mut self) -> Result<()> {
        let mut first_failure = None;
        for (label, handle) in self.tasks.drain(..) {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(err) => Err(anyhow!("task join failure: {}", err)),
            };
            if let Err(err) = outcome {
                warn!(group = %self.name, task = %label, error = %err, "task failed");
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.cancel.trigger();
            warn!(group = %self.name, remaining = self.tasks.len(), "task group dropped without join; cancellation requested");
        }
    }
}
