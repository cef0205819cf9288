//! wg-netif - Single-peer WireGuard virtual interface
//!
//! Parses a WireGuard configuration file, drives a userspace WireGuard
//! engine and an in-process TCP/IP stack built from it, and exposes
//! tunnel-bound sockets to the rest of the program.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Host Process                          │
//! │                                                           │
//! │  wg.conf ──▶ ConfigParser ──▶ Config                      │
//! │                                 │                         │
//! │                                 ▼                         │
//! │  dial/listen/  ┌─────────────┐  ┌────────────────────┐    │
//! │  lookup/ping ─▶│ WgInterface │─▶│ NetStack  ◀─tun─▶  │    │
//! │                └──────┬──────┘  │ Engine             │    │
//! │                       │ close   └─────────┬──────────┘    │
//! │                       ▼                   │               │
//! │                 drain thread              │               │
//! └───────────────────────────────────────────│───────────────┘
//!                                             ▼ UDP
//!                                   ┌───────────────────┐
//!                                   │  WireGuard Peer   │
//!                                   └───────────────────┘
//! ```
//!
//! # Features
//!
//! - **No root required**: sockets live in a virtual stack, not the host's
//! - **Pluggable backend**: the engine and stack come from a [`Backend`]
//! - **Graceful teardown**: closed engines drain before releasing sockets
//! - **`mock` feature**: in-memory backend for tests

mod backend;
mod config;
mod drain;
mod ini;
mod interface;
mod keys;
mod parse;
mod ping;
mod resolver;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{Backend, BackendError, Conn, Engine, NetStack, Network};
pub use config::{Config, ConfigError, LogLevel, ParseOptions};
pub use drain::{DrainConfig, DrainOutcome, spawn_drain, wait_for_no_load};
pub use interface::{DEFAULT_MTU, InterfaceError, InterfaceState, WgInterface};
pub use keys::{KEY_LEN, KeyError, PresharedKey, PrivateKey, PublicKey};
pub use parse::{ConfigParser, EndpointError, IntError};
pub use ping::{PING_TIMEOUT, PingError, ping4};
pub use resolver::{HostResolver, StaticResolver, SystemResolver};
