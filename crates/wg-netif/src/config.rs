//! Interface Configuration
//!
//! The validated in-memory form of a single-peer WireGuard configuration,
//! the options that steer parsing, and both renderings of a [`Config`]:
//! the human-readable file form (`Display`) and the engine's control form
//! ([`Config::uapi_conf`]).

use crate::keys::{KeyError, PresharedKey, PrivateKey, PublicKey};
use crate::parse::{EndpointError, IntError};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Engine log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No engine output
    #[default]
    Silent,
    /// Errors only
    Error,
    /// Everything
    Verbose,
}

impl LogLevel {
    /// Most verbose `tracing` level an engine should emit at, if any
    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            LogLevel::Silent => None,
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Verbose => Some(tracing::Level::DEBUG),
        }
    }
}

/// Defaults applied while parsing a configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// `AllowedIPs` used when the `[Peer]` section has none
    pub allowed_ips: String,
    /// `DNS` used when the `[Interface]` section has none
    pub dns: String,
    /// Copied verbatim into [`Config::log_level`]
    pub log_level: LogLevel,
    /// Keep IPv6 entries of `[Interface] Address`
    pub allow_ipv6: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            allowed_ips: "0.0.0.0/0".to_string(),
            dns: String::new(),
            log_level: LogLevel::Silent,
            allow_ipv6: false,
        }
    }
}

impl ParseOptions {
    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Options(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Options(e.to_string()))
    }

    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let load = match ext {
            "toml" => Self::from_toml,
            "json" => Self::from_json,
            _ => {
                return Err(ConfigError::Options(format!(
                    "unsupported options format: {}",
                    path.display()
                )));
            }
        };

        load(&std::fs::read_to_string(path)?)
    }
}

/// Single-peer WireGuard interface configuration
///
/// Built by [`ConfigParser`](crate::ConfigParser) or directly by a caller,
/// then shared read-only with a [`WgInterface`](crate::WgInterface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Local prefixes, at least one
    pub addresses: Vec<IpNet>,
    /// Our private key
    pub private_key: PrivateKey,
    /// The peer's public key
    pub public_key: PublicKey,
    /// Preshared key (optional)
    pub preshared_key: Option<PresharedKey>,
    /// The peer's endpoint; `None` for a listen-only interface
    pub endpoint: Option<SocketAddr>,
    /// Traffic the peer may send and receive
    pub allowed_ips: Vec<IpNet>,
    /// Resolvers advertised to the virtual stack
    pub dns: Vec<IpAddr>,
    /// UDP listen port, 0 for ephemeral
    pub listen_port: u16,
    /// Keepalive interval in seconds, 0 disables
    pub persistent_keepalive: u16,
    /// Engine log verbosity
    pub log_level: LogLevel,
}

impl Config {
    /// Create a configuration with only keys set
    pub fn new(private_key: PrivateKey, public_key: PublicKey) -> Self {
        Self {
            addresses: Vec::new(),
            private_key,
            public_key,
            preshared_key: None,
            endpoint: None,
            allowed_ips: Vec::new(),
            dns: Vec::new(),
            listen_port: 0,
            persistent_keepalive: 0,
            log_level: LogLevel::Silent,
        }
    }

    /// Validate invariants the parser would have enforced
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        Ok(())
    }

    /// Local addresses without their prefix lengths
    pub fn local_addrs(&self) -> Vec<IpAddr> {
        self.addresses.iter().map(|net| net.addr()).collect()
    }

    /// Render the control-interface (UAPI) form pushed into the engine
    pub fn uapi_conf(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&format!("private_key={}\n", self.private_key.to_hex()));
        if self.listen_port > 0 {
            buf.push_str(&format!("listen_port={}\n", self.listen_port));
        }
        buf.push_str(&format!("public_key={}\n", self.public_key.to_hex()));
        if let Some(endpoint) = self.endpoint {
            buf.push_str(&format!("endpoint={}\n", endpoint));
        }
        if let Some(ref psk) = self.preshared_key {
            buf.push_str(&format!("preshared_key={}\n", psk.to_hex()));
        }
        for net in &self.allowed_ips {
            buf.push_str(&format!("allowed_ip={}\n", net));
        }
        if self.persistent_keepalive > 0 {
            buf.push_str(&format!("persistent_keepalive_interval={}\n", self.persistent_keepalive));
        }
        buf
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

/// Renders the configuration file form, parseable by `ConfigParser`
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Interface]\nPrivateKey = {}", self.private_key.to_base64())?;
        if self.listen_port > 0 {
            write!(f, "\nListenPort = {}", self.listen_port)?;
        }
        if !self.addresses.is_empty() {
            write!(f, "\nAddress = {}", join(&self.addresses))?;
        }
        if !self.dns.is_empty() {
            write!(f, "\nDNS = {}", join(&self.dns))?;
        }

        write!(f, "\n\n[Peer]\nPublicKey = {}", self.public_key.to_base64())?;
        if let Some(endpoint) = self.endpoint {
            write!(f, "\nEndpoint = {}", endpoint)?;
        }
        if let Some(ref psk) = self.preshared_key {
            write!(f, "\nPresharedKey = {}", psk.to_hex())?;
        }
        if self.persistent_keepalive > 0 {
            write!(f, "\nPersistentKeepalive = {}", self.persistent_keepalive)?;
        }
        if !self.allowed_ips.is_empty() {
            write!(f, "\nAllowedIPs = {}", join(&self.allowed_ips))?;
        }
        writeln!(f)
    }
}

/// Configuration errors
///
/// Each variant names the offending field and carries the lower-level
/// cause as its source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Syntax error on line {line}")]
    Syntax { line: usize },

    #[error("Invalid [Interface] PrivateKey")]
    InvalidPrivateKey(#[source] KeyError),

    #[error("Invalid [Peer] PublicKey")]
    InvalidPublicKey(#[source] KeyError),

    #[error("Missing [Interface] Address")]
    MissingAddress,

    #[error("Invalid [Interface] Address {value:?}")]
    InvalidAddress {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("Invalid [Interface] DNS {value:?}")]
    InvalidDns {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("Invalid [Peer] AllowedIPs {value:?}")]
    InvalidAllowedIps {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("Invalid [Peer] PresharedKey")]
    InvalidPresharedKey(#[source] KeyError),

    #[error("Invalid [Peer] PersistentKeepalive")]
    InvalidPersistentKeepalive(#[source] IntError),

    #[error("Invalid [Interface] ListenPort")]
    InvalidListenPort(#[source] IntError),

    #[error("Invalid [Peer] Endpoint")]
    InvalidEndpoint(#[source] EndpointError),

    #[error("Invalid parse options: {0}")]
    Options(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "WDE5QVQyVWxQRWZBUEdldkxMWHRURng5MlVPTlk4M1E=";

    fn sample() -> Config {
        let mut config = Config::new(
            PrivateKey::from_base64(KEY).unwrap(),
            PublicKey::from_base64(KEY).unwrap(),
        );
        config.addresses = vec!["10.0.0.2/24".parse().unwrap()];
        config
    }

    #[test]
    fn test_validate_requires_address() {
        let mut config = sample();
        assert!(config.validate().is_ok());

        config.addresses.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingAddress)));
    }

    #[test]
    fn test_minimal_uapi_omits_unset_fields() {
        let config = sample();
        assert_eq!(
            config.uapi_conf(),
            "private_key=583139415432556c50456641504765764c4c58745446783932554f4e59383351\n\
             public_key=583139415432556c50456641504765764c4c58745446783932554f4e59383351\n"
        );
    }

    #[test]
    fn test_minimal_display_omits_unset_fields() {
        let config = sample();
        let text = config.to_string();

        assert!(text.starts_with("[Interface]\nPrivateKey = "));
        assert!(text.contains("\nAddress = 10.0.0.2/24\n\n[Peer]\n"));
        assert!(!text.contains("ListenPort"));
        assert!(!text.contains("DNS"));
        assert!(!text.contains("Endpoint"));
        assert!(!text.contains("AllowedIPs"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_local_addrs_strip_prefix() {
        let mut config = sample();
        config.addresses.push("fd00::2/64".parse().unwrap());
        assert_eq!(
            config.local_addrs(),
            vec!["10.0.0.2".parse::<IpAddr>().unwrap(), "fd00::2".parse().unwrap()]
        );
    }

    #[test]
    fn test_parse_options_default() {
        let opts = ParseOptions::default();
        assert_eq!(opts.allowed_ips, "0.0.0.0/0");
        assert!(opts.dns.is_empty());
        assert!(!opts.allow_ipv6);
    }

    #[test]
    fn test_parse_options_toml() {
        let opts = ParseOptions::from_toml(
            "dns = \"1.1.1.1\"\nlog_level = \"verbose\"\nallow_ipv6 = true\n",
        )
        .unwrap();

        assert_eq!(opts.allowed_ips, "0.0.0.0/0");
        assert_eq!(opts.dns, "1.1.1.1");
        assert_eq!(opts.log_level, LogLevel::Verbose);
        assert!(opts.allow_ipv6);
    }

    #[test]
    fn test_parse_options_json() {
        let opts = ParseOptions::from_json(r#"{"allowed_ips": "10.0.0.0/8"}"#).unwrap();
        assert_eq!(opts.allowed_ips, "10.0.0.0/8");
        assert_eq!(opts.log_level, LogLevel::Silent);

        assert!(matches!(
            ParseOptions::from_json("{"),
            Err(ConfigError::Options(_))
        ));
    }

    #[test]
    fn test_log_level_tracing() {
        assert_eq!(LogLevel::Silent.as_tracing_level(), None);
        assert_eq!(LogLevel::Verbose.as_tracing_level(), Some(tracing::Level::DEBUG));
    }
}
