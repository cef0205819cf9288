//! In-memory backend for tests
//!
//! [`MockBackend`] hands out engines that record what the interface does to
//! them and stacks whose sockets loop data back (or answer ICMP echo).
//! Failures can be injected at any construction stage.

use crate::backend::{Backend, BackendError, Conn, Engine, NetStack, Network};
use crate::config::LogLevel;
use async_trait::async_trait;
use etherparse::{Icmpv4Header, Icmpv4Slice, Icmpv4Type};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Construction step at which to inject a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateStack,
    CreateEngine,
    PushConfig,
    BringUp,
}

/// How a mock `ping4` socket behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingMode {
    /// Answer every echo request
    #[default]
    Echo,
    /// Never answer
    Silent,
    /// Fail every write
    WriteFails,
    /// Fail every read
    ReadFails,
    /// Answer with the wrong sequence number
    WrongSeq,
    /// Answer with bytes that are not ICMP
    Garbage,
}

/// What happened to one engine
#[derive(Debug, Default)]
pub struct EngineRecord {
    uapi: Mutex<Option<String>>,
    up: AtomicBool,
    detached: AtomicBool,
    closes: AtomicUsize,
    busy: AtomicBool,
}

impl EngineRecord {
    /// Last configuration pushed
    pub fn pushed_config(&self) -> Option<String> {
        lock(&self.uapi).clone()
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn peers_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Times `close` was called
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Report in-flight work to the drain
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

/// Recording engine
pub struct MockEngine {
    record: Arc<EngineRecord>,
    fail_at: Option<Stage>,
}

impl Engine for MockEngine {
    fn push_config(&self, uapi: &str) -> Result<(), BackendError> {
        if self.fail_at == Some(Stage::PushConfig) {
            return Err("mock: push_config rejected".into());
        }
        *lock(&self.record.uapi) = Some(uapi.to_string());
        Ok(())
    }

    fn bring_up(&self) -> Result<(), BackendError> {
        if self.fail_at == Some(Stage::BringUp) {
            return Err("mock: device refused to come up".into());
        }
        self.record.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach_all_peers(&self) {
        self.record.detached.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.record.up.store(false, Ordering::SeqCst);
        self.record.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_under_load(&self) -> bool {
        self.record.busy.load(Ordering::SeqCst)
    }
}

/// Parameters a stack was built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRecord {
    pub addrs: Vec<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub mtu: u16,
}

/// Device handle passed from stack to engine
#[derive(Debug)]
pub struct MockTun {
    pub mtu: u16,
}

#[derive(Debug, Default)]
struct BackendState {
    fail_at: Mutex<Option<Stage>>,
    engines: Mutex<Vec<Arc<EngineRecord>>>,
    stacks: Mutex<Vec<StackRecord>>,
}

/// Backend whose state is shared between clones
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    ping: PingMode,
    hosts: HashMap<String, Vec<IpAddr>>,
    dial_delay: Option<Duration>,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior of `ping4` sockets on stacks built from now on
    pub fn with_ping_mode(mut self, mode: PingMode) -> Self {
        self.ping = mode;
        self
    }

    /// Answer lookups for `host` through the tunnel
    pub fn with_host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.to_lowercase(), addrs);
        self
    }

    /// Make every dial take `delay`
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    /// Fail the next constructions at `stage`, or stop failing with `None`
    pub fn fail_at(&self, stage: Option<Stage>) {
        *lock(&self.state.fail_at) = stage;
    }

    /// Every engine created so far, oldest first
    pub fn engines(&self) -> Vec<Arc<EngineRecord>> {
        lock(&self.state.engines).clone()
    }

    /// Every stack created so far, oldest first
    pub fn stacks(&self) -> Vec<StackRecord> {
        lock(&self.state.stacks).clone()
    }

    fn failing(&self) -> Option<Stage> {
        *lock(&self.state.fail_at)
    }
}

impl Backend for MockBackend {
    type Tun = MockTun;
    type Stack = MockStack;
    type Engine = MockEngine;

    fn create_stack(
        &self,
        addrs: &[IpAddr],
        dns: &[IpAddr],
        mtu: u16,
    ) -> Result<(MockTun, MockStack), BackendError> {
        if self.failing() == Some(Stage::CreateStack) {
            return Err("mock: no stack for you".into());
        }
        lock(&self.state.stacks).push(StackRecord {
            addrs: addrs.to_vec(),
            dns: dns.to_vec(),
            mtu,
        });

        let mut stack = MockStack::new(self.ping);
        stack.hosts = self.hosts.clone();
        stack.dial_delay = self.dial_delay;
        Ok((MockTun { mtu }, stack))
    }

    fn create_engine(&self, _tun: MockTun, _log_level: LogLevel) -> Result<MockEngine, BackendError> {
        let fail_at = self.failing();
        if fail_at == Some(Stage::CreateEngine) {
            return Err("mock: engine construction failed".into());
        }
        let record = Arc::new(EngineRecord::default());
        lock(&self.state.engines).push(record.clone());
        Ok(MockEngine { record, fail_at })
    }
}

/// Stack whose stream sockets echo writes back to the reader
#[derive(Debug, Default)]
pub struct MockStack {
    ping: PingMode,
    hosts: HashMap<String, Vec<IpAddr>>,
    dial_delay: Option<Duration>,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl MockStack {
    pub fn new(ping: PingMode) -> Self {
        Self {
            ping,
            ..Self::default()
        }
    }

    /// Make every socket's `close` fail
    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Sockets released so far, by `close` or by drop
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn conn(&self, kind: ConnKind, peer: Option<SocketAddr>) -> MockConn {
        MockConn {
            kind,
            peer,
            inbox: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            closes: self.closes.clone(),
            fail_close: self.fail_close,
        }
    }
}

#[async_trait]
impl NetStack for MockStack {
    type Conn = MockConn;
    type Listener = MockListener;

    async fn dial(&self, network: Network, address: &str) -> io::Result<MockConn> {
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }
        match network {
            Network::Ping4 | Network::Ping6 => {
                address
                    .parse::<IpAddr>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                Ok(self.conn(ConnKind::Ping(self.ping), None))
            }
            _ => {
                let peer = address
                    .parse::<SocketAddr>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                Ok(self.conn(ConnKind::Loopback, Some(peer)))
            }
        }
    }

    async fn listen_tcp(&self, addr: SocketAddr) -> io::Result<MockListener> {
        Ok(MockListener { addr })
    }

    async fn lookup_host(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(vec![addr]);
        }
        self.hosts
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such host: {}", host)))
    }
}

/// Bound TCP listener
#[derive(Debug)]
pub struct MockListener {
    addr: SocketAddr,
}

impl MockListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[derive(Debug, Clone, Copy)]
enum ConnKind {
    Loopback,
    Ping(PingMode),
}

/// Connected mock socket
#[derive(Debug)]
pub struct MockConn {
    kind: ConnKind,
    peer: Option<SocketAddr>,
    inbox: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl MockConn {
    /// Remote address for stream and datagram sockets
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Count the first close only
    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConn {
    fn drop(&mut self) {
        self.release();
    }
}

fn echo_reply(request: &[u8], wrong_seq: bool) -> Option<Vec<u8>> {
    let slice = Icmpv4Slice::from_slice(request).ok()?;
    let Icmpv4Type::EchoRequest(mut echo) = slice.icmp_type() else {
        return None;
    };
    if wrong_seq {
        echo.seq = echo.seq.wrapping_add(1);
    }

    let header = Icmpv4Header::with_checksum(Icmpv4Type::EchoReply(echo), slice.payload());
    let mut reply = header.to_bytes().to_vec();
    reply.extend_from_slice(slice.payload());
    Some(reply)
}

#[async_trait]
impl Conn for MockConn {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let reply = match self.kind {
            ConnKind::Loopback => Some(buf.to_vec()),
            ConnKind::Ping(PingMode::WriteFails) => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock: write failed"));
            }
            ConnKind::Ping(PingMode::Echo) => echo_reply(buf, false),
            ConnKind::Ping(PingMode::WrongSeq) => echo_reply(buf, true),
            ConnKind::Ping(PingMode::Garbage) => Some(vec![0xde, 0xad, 0xbe]),
            ConnKind::Ping(PingMode::Silent | PingMode::ReadFails) => None,
        };
        if let Some(reply) = reply {
            lock(&self.inbox).push_back(reply);
        }
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let ConnKind::Ping(PingMode::ReadFails) = self.kind {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock: read failed"));
        }
        let next = lock(&self.inbox).pop_front();
        match next {
            Some(msg) => {
                let n = msg.len().min(buf.len());
                buf[..n].copy_from_slice(&msg[..n]);
                Ok(n)
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.release();
        if self.fail_close {
            return Err(io::Error::other("mock: close failed"));
        }
        Ok(())
    }
}
