//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Monitoring connection to the primary's control endpoint."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, error, info};

use crate::error::ConnectionError;

/// Configured control endpoint of the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorAddress {
    host: String,
    port: u16,
}

impl MonitorAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve the endpoint once. Never fails: an unusable endpoint is logged
    /// and carried forward so that every later `open` reports it.
    pub async fn resolve(&self) -> ResolvedAddress {
        if self.port == 0 {
            error!(host = %self.host, port = self.port, "unable to locate primary control endpoint");
            return ResolvedAddress {
                label: self.to_string(),
                socket: None,
            };
        }
        let socket = match lookup_host((self.host.as_str(), self.port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(err) => {
                error!(host = %self.host, port = self.port, error = %err, "unable to resolve primary control endpoint");
                None
            }
        };
        if socket.is_none() {
            error!(host = %self.host, port = self.port, "primary control endpoint resolved to no addresses");
        }
        ResolvedAddress {
            label: self.to_string(),
            socket,
        }
    }
}

impl fmt::Display for MonitorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result of resolving a [`MonitorAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    label: String,
    socket: Option<SocketAddr>,
}

impl ResolvedAddress {
    pub fn from_socket(socket: SocketAddr) -> Self {
        Self {
            label: socket.to_string(),
            socket: Some(socket),
        }
    }

    pub fn socket(&self) -> Option<SocketAddr> {
        self.socket
    }

    fn target(&self) -> Result<SocketAddr, ConnectionError> {
        match self.socket {
            None => Err(ConnectionError::AddressInvalid {
                address: self.label.clone(),
                reason: "endpoint did not resolve",
            }),
            Some(socket) if socket.port() == 0 => Err(ConnectionError::AddressInvalid {
                address: self.label.clone(),
                reason: "port is 0",
            }),
            Some(socket) => Ok(socket),
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket {
            Some(socket) => write!(f, "{} ({})", self.label, socket),
            None => write!(f, "{} (unresolved)", self.label),
        }
    }
}

#[derive(Debug, Default)]
enum ConnectionState {
    #[default]
    Closed,
    Open(TcpStream),
}

/// Owner of the single monitoring connection.
///
/// The connection is either closed (nothing held) or open on a connected,
/// non-blocking socket. Every operation takes `&mut self`, so the socket is
/// never touched from two places at once.
#[derive(Debug)]
pub struct ConnectionManager {
    connect_timeout: Duration,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            state: ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    /// The open socket, if any. Only readiness may be inspected; payload is
    /// never consumed.
    pub fn stream(&self) -> Option<&TcpStream> {
        match &self.state {
            ConnectionState::Open(stream) => Some(stream),
            ConnectionState::Closed => None,
        }
    }

    /// Establish the connection. Any connection already held is released first,
    /// and on failure the manager is left closed.
    pub async fn open(&mut self, address: &ResolvedAddress) -> Result<(), ConnectionError> {
        self.close();
        let target = address.target()?;
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectionError::Connect {
                    address: target,
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectionError::ConnectTimeout {
                    address: target,
                    timeout: self.connect_timeout,
                })
            }
        };
        info!(address = %target, "monitoring connection established");
        self.state = ConnectionState::Open(stream);
        Ok(())
    }

    /// Release the connection. Closing a closed connection is a no-op.
    pub fn close(&mut self) {
        if let ConnectionState::Open(stream) = std::mem::take(&mut self.state) {
            debug!(peer = ?stream.peer_addr().ok(), "monitoring connection closed");
            drop(stream);
        }
    }

    /// Close, then open again.
    pub async fn reopen(&mut self, address: &ResolvedAddress) -> Result<(), ConnectionError> {
        self.close();
        self.open(address).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
