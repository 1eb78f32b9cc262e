//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Control endpoint that answers the peer's standby monitor."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use r_dbd_rt::ShutdownSignal;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::role::SharedRole;

/// Byte written to every accepted monitor. Its arrival is what makes the
/// monitor's connection readable.
pub const HEARTBEAT_BYTE: u8 = b'\n';

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const HEARTBEAT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Listener the active instance exposes for the standby's monitor.
///
/// Each accepted connection receives one heartbeat byte and is then held
/// open. When the responder stops, every held connection is dropped so the
/// monitor sees a hang-up.
#[derive(Debug)]
pub struct HeartbeatResponder {
    listener: TcpListener,
    addr: SocketAddr,
}

impl HeartbeatResponder {
    /// Bind the control endpoint. Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let std_listener = StdTcpListener::bind(addr)
            .with_context(|| format!("failed to bind control endpoint {}", addr))?;
        std_listener
            .set_nonblocking(true)
            .with_context(|| "failed to configure control endpoint as non-blocking")?;
        let listener = TcpListener::from_std(std_listener)
            .with_context(|| "failed to convert std listener into tokio listener")?;
        let addr = listener.local_addr().unwrap_or(addr);
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve monitors until `stop` is set, or until `wake` fires and the role
    /// is no longer active.
    pub async fn serve(self, role: SharedRole, wake: Arc<Notify>, stop: ShutdownSignal) -> Result<()> {
        info!(address = %self.addr, "control endpoint serving heartbeats");
        let mut monitors: Vec<(SocketAddr, TcpStream)> = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                _ = wake.notified() => {
                    if !role.is_active() {
                        info!(address = %self.addr, "role no longer active; control endpoint closing");
                        break;
                    }
                    debug!("control endpoint woken while still active");
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((mut stream, peer)) => {
                        let sent = tokio::select! {
                            biased;
                            _ = stop.wait() => break,
                            sent = send_heartbeat(&mut stream, HEARTBEAT_WRITE_TIMEOUT) => sent,
                        };
                        if let Err(err) = sent {
                            warn!(peer = %peer, error = %err, "failed to send heartbeat");
                            continue;
                        }
                        monitors.retain(|(_, held)| still_connected(held));
                        info!(peer = %peer, held = monitors.len() + 1, "monitor connected");
                        monitors.push((peer, stream));
                    }
                    Err(err) => {
                        warn!(error = %err, "control endpoint accept failed");
                        if !stop.sleep(ACCEPT_BACKOFF).await {
                            break;
                        }
                    }
                },
            }
        }
        info!(address = %self.addr, released = monitors.len(), "control endpoint stopped");
        Ok(())
    }
}

/// Write the heartbeat byte, giving up after `limit` on a peer that stopped reading.
async fn send_heartbeat(stream: &mut TcpStream, limit: Duration) -> io::Result<()> {
    match tokio::time::timeout(limit, stream.write_all(&[HEARTBEAT_BYTE])).await {
        Ok(written) => written,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("heartbeat write stalled for {:?}", limit),
        )),
    }
}

fn still_connected(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        (server, client)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_reaches_a_reading_peer() {
        let (mut server, client) = connected_pair().await;
        send_heartbeat(&mut server, Duration::from_secs(1))
            .await
            .expect("heartbeat sent");
        client.readable().await.expect("readable");
        let mut byte = [0u8; 1];
        assert_eq!(client.try_read(&mut byte).expect("read"), 1);
        assert_eq!(byte[0], HEARTBEAT_BYTE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_peer_does_not_hold_the_writer() {
        let (mut server, _client) = connected_pair().await;
        // Fill the send path until the peer, which never reads, applies backpressure.
        let chunk = vec![0u8; 64 * 1024];
        loop {
            match tokio::time::timeout(Duration::from_millis(200), server.writable()).await {
                Ok(ready) => ready.expect("writable"),
                Err(_) => break,
            }
            match server.try_write(&chunk) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("unexpected write error: {err}"),
            }
        }

        let started = Instant::now();
        let err = send_heartbeat(&mut server, Duration::from_millis(200))
            .await
            .expect_err("peer is not reading");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
