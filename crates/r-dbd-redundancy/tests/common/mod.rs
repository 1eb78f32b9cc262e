//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Shared fixtures for failover integration tests."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use r_dbd_redundancy::{
    FailoverHooks, FailoverSettings, MonitorAddress, Role, SharedRole, HEARTBEAT_BYTE,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the scripted primary does with an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Send a heartbeat byte and keep the connection open.
    Speak,
    /// Keep the connection open without sending anything.
    Silent,
    /// Close the connection right away.
    HangUp,
}

/// Loopback listener standing in for the primary's control endpoint.
pub struct ScriptedPrimary {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ScriptedPrimary {
    /// `script(n)` decides the fate of the n-th accepted connection (1-based).
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(usize) -> Script + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind primary");
        let addr = listener.local_addr().expect("primary addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                match script(n) {
                    Script::Speak => {
                        stream.write_all(&[HEARTBEAT_BYTE]).await.expect("heartbeat");
                        held.push(stream);
                    }
                    Script::Silent => held.push(stream),
                    Script::HangUp => drop(stream),
                }
            }
        });
        Self {
            addr,
            accepted,
            task,
        }
    }

    pub fn address(&self) -> MonitorAddress {
        MonitorAddress::new("127.0.0.1", self.addr.port())
    }

    pub fn socket(&self) -> SocketAddr {
        self.addr
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedPrimary {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A loopback address nothing listens on.
pub fn refused_address() -> MonitorAddress {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);
    MonitorAddress::new("127.0.0.1", port)
}

pub fn fast_settings(heartbeat_timeout_ms: u64) -> FailoverSettings {
    FailoverSettings {
        heartbeat_timeout: Duration::from_millis(heartbeat_timeout_ms),
        connect_timeout: Duration::from_millis(500),
        throttle: Duration::from_millis(10),
        startup_grace: Duration::ZERO,
    }
}

/// Hooks that count invocations and remember the role seen at wake time.
pub struct RecordingHooks {
    role: SharedRole,
    fail: bool,
    wakes: AtomicUsize,
    cancels: AtomicUsize,
    role_at_wake: Mutex<Vec<Role>>,
}

impl RecordingHooks {
    pub fn new(role: SharedRole) -> Arc<Self> {
        Arc::new(Self::build(role, false))
    }

    pub fn failing(role: SharedRole) -> Arc<Self> {
        Arc::new(Self::build(role, true))
    }

    fn build(role: SharedRole, fail: bool) -> Self {
        Self {
            role,
            fail,
            wakes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            role_at_wake: Mutex::new(Vec::new()),
        }
    }

    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn roles_at_wake(&self) -> Vec<Role> {
        self.role_at_wake.lock().clone()
    }
}

impl FailoverHooks for RecordingHooks {
    fn notify_request_engine_role_changed(&self) -> anyhow::Result<()> {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        self.role_at_wake.lock().push(self.role.get());
        if self.fail {
            return Err(anyhow!("request engine unavailable"));
        }
        Ok(())
    }

    fn cancel_periodic_aggregation(&self) -> anyhow::Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("rollup already gone"));
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
