//! Configuration file parser
//!
//! Turns the INI-like WireGuard file format into a validated [`Config`].
//! Fields are checked in a fixed order and parsing stops at the first
//! invalid one.
//!
//! ```rust,ignore
//! let parser = ConfigParser::new(ParseOptions::default());
//! let config = parser.parse(&text).await?;
//! ```

use crate::config::{Config, ConfigError, ParseOptions};
use crate::ini::IniFile;
use crate::keys::{KeyError, PresharedKey, PrivateKey, PublicKey};
use crate::resolver::{HostResolver, SystemResolver};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::num::ParseIntError;
use std::path::Path;
use tracing::debug;

/// Integer field errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntError {
    #[error("not an integer: {0}")]
    Parse(#[from] ParseIntError),

    #[error("{value} out of range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
}

/// Endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("malformed endpoint {0:?}")]
    Malformed(String),

    #[error("invalid endpoint port")]
    InvalidPort(#[source] IntError),

    #[error("lookup of {host:?} failed")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable address for {host:?}")]
    Unresolved { host: String },
}

/// Parses configuration text into a [`Config`]
pub struct ConfigParser<R = SystemResolver> {
    options: ParseOptions,
    resolver: R,
}

impl ConfigParser<SystemResolver> {
    /// Create a parser that resolves endpoint hostnames via system DNS
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            resolver: SystemResolver::new(),
        }
    }
}

impl Default for ConfigParser<SystemResolver> {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

impl<R: HostResolver> ConfigParser<R> {
    /// Swap the resolver used for endpoint hostnames
    pub fn with_resolver<T: HostResolver>(self, resolver: T) -> ConfigParser<T> {
        ConfigParser {
            options: self.options,
            resolver,
        }
    }

    /// Parse options in effect
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Read and parse a configuration file
    pub async fn parse_file(&self, path: &Path) -> Result<Config, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        self.parse(&text).await
    }

    /// Parse and validate configuration text
    pub async fn parse(&self, text: &str) -> Result<Config, ConfigError> {
        let opts = &self.options;
        let ini = IniFile::parse(text).map_err(|line| ConfigError::Syntax { line })?;

        let private_key = required_key(&ini, "interface", "privatekey")
            .and_then(PrivateKey::from_base64)
            .map_err(ConfigError::InvalidPrivateKey)?;
        let public_key = required_key(&ini, "peer", "publickey")
            .and_then(PublicKey::from_base64)
            .map_err(ConfigError::InvalidPublicKey)?;

        let mut config = Config::new(private_key, public_key);

        for entry in split_list(ini.get_or("interface", "address", "")) {
            let net = parse_prefix(entry).map_err(|source| ConfigError::InvalidAddress {
                value: entry.to_string(),
                source,
            })?;
            if opts.allow_ipv6 || net.addr().is_ipv4() {
                config.addresses.push(net);
            } else {
                debug!("Dropping IPv6 interface address {}", net);
            }
        }
        if config.addresses.is_empty() {
            return Err(ConfigError::MissingAddress);
        }

        for entry in split_list(ini.get_or("interface", "dns", &opts.dns)) {
            let addr = entry.parse::<IpAddr>().map_err(|source| ConfigError::InvalidDns {
                value: entry.to_string(),
                source,
            })?;
            config.dns.push(addr);
        }

        for entry in split_list(ini.get_or("peer", "allowedips", &opts.allowed_ips)) {
            let net = parse_prefix(entry).map_err(|source| ConfigError::InvalidAllowedIps {
                value: entry.to_string(),
                source,
            })?;
            config.allowed_ips.push(net);
        }

        if let Some(v) = ini.get("peer", "presharedkey") {
            let psk = PresharedKey::decode(v).map_err(ConfigError::InvalidPresharedKey)?;
            config.preshared_key = Some(psk);
        }

        if let Some(v) = ini.get("peer", "persistentkeepalive") {
            config.persistent_keepalive =
                parse_u16(v, 0).map_err(ConfigError::InvalidPersistentKeepalive)?;
        }

        if let Some(v) = ini.get("interface", "listenport") {
            config.listen_port = parse_u16(v, 1).map_err(ConfigError::InvalidListenPort)?;
        }

        if let Some(v) = ini.get("peer", "endpoint") {
            let endpoint = parse_endpoint(v, &self.resolver)
                .await
                .map_err(ConfigError::InvalidEndpoint)?;
            config.endpoint = Some(endpoint);
        }

        config.log_level = opts.log_level;
        Ok(config)
    }
}

fn required_key<'a>(ini: &'a IniFile, section: &str, key: &str) -> Result<&'a str, KeyError> {
    ini.get(section, key).ok_or(KeyError::Missing)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// CIDR prefix, or a bare address taken as a host prefix
fn parse_prefix(value: &str) -> Result<IpNet, ipnet::AddrParseError> {
    value
        .parse::<IpNet>()
        .or_else(|err| value.parse::<IpAddr>().map(IpNet::from).map_err(|_| err))
}

fn parse_u16(value: &str, min: u16) -> Result<u16, IntError> {
    let n: i64 = value.trim().parse()?;
    if n < i64::from(min) || n > i64::from(u16::MAX) {
        return Err(IntError::OutOfRange {
            value: n,
            min: i64::from(min),
            max: i64::from(u16::MAX),
        });
    }
    Ok(n as u16)
}

/// Split `host:port` or `[host]:port`
fn split_host_port(value: &str) -> Option<(&str, &str)> {
    if let Some(rest) = value.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return Some((host, port));
    }
    let (host, port) = value.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

/// `fe80::1%2` with a numeric scope id; interface names are not mapped
fn parse_zoned(host: &str, port: u16) -> Option<SocketAddr> {
    let (ip, zone) = host.split_once('%')?;
    let ip = ip.parse::<Ipv6Addr>().ok()?;
    let scope = zone.parse::<u32>().ok()?;
    Some(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope)))
}

/// Literal `addr:port`, else `host:port` resolved through `resolver`
pub(crate) async fn parse_endpoint<R: HostResolver + ?Sized>(
    value: &str,
    resolver: &R,
) -> Result<SocketAddr, EndpointError> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) =
        split_host_port(value).ok_or_else(|| EndpointError::Malformed(value.to_string()))?;
    let port = parse_u16(port, 0).map_err(EndpointError::InvalidPort)?;

    if host.contains('%') {
        return parse_zoned(host, port).ok_or_else(|| EndpointError::Malformed(value.to_string()));
    }

    let addrs = resolver
        .lookup_ip(host)
        .await
        .map_err(|source| EndpointError::Lookup {
            host: host.to_string(),
            source,
        })?;

    let addr = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| EndpointError::Unresolved {
            host: host.to_string(),
        })?;

    debug!("Resolved endpoint {} to {}", host, addr);
    Ok(SocketAddr::new(addr, port))
}
