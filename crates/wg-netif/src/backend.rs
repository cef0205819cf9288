//! Engine and virtual stack seams
//!
//! The WireGuard engine (handshake, encryption) and the in-process TCP/IP
//! stack are supplied by the caller through these traits. [`WgInterface`]
//! only drives their control surface.
//!
//! ```text
//!   WgInterface ──create_stack──▶ (Tun, NetStack) ──dial/listen/lookup──▶ …
//!        │
//!        └──create_engine(Tun)──▶ Engine ──push_config/bring_up──▶ peer
//! ```
//!
//! [`WgInterface`]: crate::WgInterface

use crate::config::LogLevel;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Opaque construction failure from a backend
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Control surface of a running WireGuard engine
pub trait Engine: Send + 'static {
    /// Apply a control-interface (UAPI) configuration
    fn push_config(&self, uapi: &str) -> Result<(), BackendError>;

    /// Bring the device up
    fn bring_up(&self) -> Result<(), BackendError>;

    /// Drop every configured peer
    fn detach_all_peers(&self);

    /// Release all resources, including the tun device and bound sockets
    fn close(&self);

    /// Whether handshakes or transfers are still in flight
    fn is_under_load(&self) -> bool;
}

/// Factory for matched (stack, engine) pairs
pub trait Backend: Send + Sync + 'static {
    /// Device handle connecting a stack to its engine
    type Tun: Send;
    /// Virtual network stack
    type Stack: NetStack;
    /// Engine bound to a tun device
    type Engine: Engine;

    /// Build a virtual stack owning `addrs`, resolving through `dns`
    fn create_stack(
        &self,
        addrs: &[IpAddr],
        dns: &[IpAddr],
        mtu: u16,
    ) -> Result<(Self::Tun, Self::Stack), BackendError>;

    /// Build an engine that moves packets for `tun`
    fn create_engine(&self, tun: Self::Tun, log_level: LogLevel) -> Result<Self::Engine, BackendError>;
}

/// Network names accepted by dial and listen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Ping4,
    Ping6,
}

impl Network {
    /// Get network name
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Ping4 => "ping4",
            Network::Ping6 => "ping6",
        }
    }

    /// Is this a TCP variant?
    pub fn is_tcp(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            "ping4" => Ok(Network::Ping4),
            "ping6" => Ok(Network::Ping6),
            _ => Err(s.to_string()),
        }
    }
}

/// In-process TCP/IP stack bound to the tunnel's addresses
#[async_trait]
pub trait NetStack: Send + Sync + 'static {
    /// Connected socket
    type Conn: Conn;
    /// TCP listener
    type Listener: Send;

    /// Connect to `address` (`host:port`, or a bare address for ping)
    async fn dial(&self, network: Network, address: &str) -> io::Result<Self::Conn>;

    /// Listen for TCP connections on `addr`
    async fn listen_tcp(&self, addr: SocketAddr) -> io::Result<Self::Listener>;

    /// Resolve `host` through the tunnel's DNS servers
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Socket returned by [`NetStack::dial`]
///
/// For `ping4`/`ping6` each `send` is one ICMP message and each `recv`
/// yields one reply.
///
/// Implementations must release the socket when dropped without `close`,
/// since callers cancel operations by dropping their futures.
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Write one message
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Read one message
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the socket
    async fn close(&self) -> io::Result<()>;
}
