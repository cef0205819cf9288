//! Interface Manager
//!
//! Owns the lifecycle of one (engine, virtual stack) pair built from a
//! [`Config`] and exposes the stack's socket operations while it is open.
//!
//! # Usage
//!
//! ```rust,ignore
//! let iface = WgInterface::new(config, backend);
//! iface.open()?;
//!
//! let conn = iface.dial(Network::Tcp, "10.0.0.1:80").await?;
//! let rtt = iface.ping4("10.0.0.1".parse()?, None).await?;
//!
//! iface.close();
//! ```

use crate::backend::{Backend, BackendError, Engine, NetStack, Network};
use crate::config::{Config, ConfigError};
use crate::drain::{DrainConfig, spawn_drain};
use crate::ping::{self, PingError};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};

/// MTU of every virtual stack
pub const DEFAULT_MTU: u16 = 1420;

/// Interface state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    /// No engine or stack
    Closed,
    /// Engine up, stack accepting sockets
    Open,
}

impl InterfaceState {
    /// Check if sockets can be created
    pub fn is_open(&self) -> bool {
        matches!(self, InterfaceState::Open)
    }
}

/// Interface errors
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("Interface not open")]
    NotOpen,

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(Network),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[source] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Ping error: {0}")]
    Ping(#[from] PingError),
}

/// The live pair; both halves are released together
struct Active<B: Backend> {
    engine: B::Engine,
    stack: Arc<B::Stack>,
}

/// A single-peer WireGuard interface
///
/// `open` and `close` are synchronous and may race with each other and with
/// socket operations from any task. Operations never hold the interface
/// lock across an await; they work on a snapshot of the current stack, so a
/// concurrent `close` lets them finish against the retiring stack.
pub struct WgInterface<B: Backend> {
    /// Immutable configuration
    config: Arc<Config>,
    /// Engine and stack factory
    backend: B,
    /// Teardown timing
    drain: DrainConfig,
    /// Current pair, if open
    active: Mutex<Option<Active<B>>>,
}

impl<B: Backend> WgInterface<B> {
    /// Create a closed interface
    pub fn new(config: impl Into<Arc<Config>>, backend: B) -> Self {
        Self {
            config: config.into(),
            backend,
            drain: DrainConfig::default(),
            active: Mutex::new(None),
        }
    }

    /// Override teardown timing
    pub fn with_drain_config(mut self, drain: DrainConfig) -> Self {
        self.drain = drain;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Get the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get current state
    pub fn state(&self) -> InterfaceState {
        if self.slot().is_some() {
            InterfaceState::Open
        } else {
            InterfaceState::Closed
        }
    }

    /// Check if the interface is open
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Active<B>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stack(&self) -> Result<Arc<B::Stack>, InterfaceError> {
        self.slot()
            .as_ref()
            .map(|active| active.stack.clone())
            .ok_or(InterfaceError::NotOpen)
    }

    /// Build a fresh engine and stack and publish them.
    ///
    /// Any pair already open is closed first. On failure nothing is
    /// published and whatever was built is released.
    pub fn open(&self) -> Result<(), InterfaceError> {
        self.close();
        self.config.validate()?;

        info!("Opening interface ({} addresses)", self.config.addresses.len());

        let active = self.build().inspect_err(|e| error!("Interface open failed: {}", e))?;

        let replaced = self.slot().replace(active);
        if let Some(previous) = replaced {
            warn!("Interface opened concurrently, retiring the older pair");
            self.retire(previous);
        }

        info!("Interface open");
        Ok(())
    }

    fn build(&self) -> Result<Active<B>, InterfaceError> {
        let (tun, stack) = self
            .backend
            .create_stack(&self.config.local_addrs(), &self.config.dns, DEFAULT_MTU)
            .map_err(InterfaceError::Backend)?;

        let engine = self
            .backend
            .create_engine(tun, self.config.log_level)
            .map_err(InterfaceError::Backend)?;

        let started = engine
            .push_config(&self.config.uapi_conf())
            .and_then(|()| engine.bring_up());

        let active = Active {
            engine,
            stack: Arc::new(stack),
        };
        match started {
            Ok(()) => Ok(active),
            Err(e) => {
                self.retire(active);
                Err(InterfaceError::Backend(e))
            }
        }
    }

    /// Release the stack and hand the engine to a drain thread
    fn retire(&self, active: Active<B>) {
        let Active { engine, stack } = active;
        drop(stack);

        engine.detach_all_peers();
        if let Err(e) = spawn_drain(engine, self.drain) {
            warn!("Failed to spawn drain thread, engine closed immediately: {}", e);
        }
    }

    /// Tear down the current pair, if any.
    ///
    /// Returns at once; the engine keeps running on a drain thread until
    /// it goes idle.
    pub fn close(&self) {
        let taken = self.slot().take();
        if let Some(active) = taken {
            info!("Closing interface");
            self.retire(active);
        }
    }

    /// Connect through the tunnel
    pub async fn dial(
        &self,
        network: Network,
        address: &str,
    ) -> Result<<B::Stack as NetStack>::Conn, InterfaceError> {
        let stack = self.stack()?;
        Ok(stack.dial(network, address).await?)
    }

    /// Connect through the tunnel, giving up at `deadline`
    pub async fn dial_deadline(
        &self,
        deadline: Instant,
        network: Network,
        address: &str,
    ) -> Result<<B::Stack as NetStack>::Conn, InterfaceError> {
        let stack = self.stack()?;
        timeout_at(deadline, stack.dial(network, address))
            .await
            .map_err(|_| InterfaceError::Timeout)?
            .map_err(InterfaceError::from)
    }

    /// Accept TCP connections on `addr` inside the tunnel
    pub async fn listen(
        &self,
        network: Network,
        addr: SocketAddr,
    ) -> Result<<B::Stack as NetStack>::Listener, InterfaceError> {
        let stack = self.stack()?;
        if !network.is_tcp() {
            return Err(InterfaceError::UnsupportedNetwork(network));
        }
        Ok(stack.listen_tcp(addr).await?)
    }

    /// Resolve `host` through the tunnel's DNS servers
    pub async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, InterfaceError> {
        let stack = self.stack()?;
        Ok(stack.lookup_host(host).await?)
    }

    /// Round-trip time of one ICMP echo to `target`
    pub async fn ping4(
        &self,
        target: Ipv4Addr,
        deadline: Option<Instant>,
    ) -> Result<Duration, InterfaceError> {
        let stack = self.stack()?;
        Ok(ping::ping4(stack.as_ref(), target, deadline).await?)
    }
}

impl<B: Backend> Drop for WgInterface<B> {
    fn drop(&mut self) {
        self.close();
    }
}
