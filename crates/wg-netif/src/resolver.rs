//! Hostname resolution for peer endpoints
//!
//! Endpoint parsing never reaches for a process-wide resolver; it asks the
//! [`HostResolver`] handed to the parser.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use tokio::sync::OnceCell;
use tracing::debug;

/// Resolves a hostname to candidate addresses
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Look up all addresses for `host`, in resolver order
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system DNS configuration
///
/// The underlying `hickory-resolver` instance is built on first use, so
/// parsing files with literal endpoints never touches system configuration.
#[derive(Default)]
pub struct SystemResolver {
    inner: OnceCell<TokioAsyncResolver>,
}

impl SystemResolver {
    /// Create a new lazily-initialized resolver
    pub fn new() -> Self {
        Self::default()
    }

    async fn resolver(&self) -> io::Result<&TokioAsyncResolver> {
        self.inner
            .get_or_try_init(|| async {
                TokioAsyncResolver::tokio_from_system_conf().map_err(io::Error::other)
            })
            .await
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        debug!("Resolving endpoint host {}", host);
        let lookup = self
            .resolver()
            .await?
            .lookup_ip(host)
            .await
            .map_err(io::Error::other)?;
        Ok(lookup.iter().collect())
    }
}

/// Fixed host table, for deterministic parsing
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the addresses for `host`
    pub fn with_host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.to_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such host: {}", host)))
    }
}
