//! Integration tests for the interface lifecycle over the mock backend
//!
//! A parsed configuration is opened against `wg_netif::mock`, exercised with
//! every socket operation, and closed while other tasks keep using it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use wg_netif::mock::{MockBackend, PingMode, Stage};
use wg_netif::{
    Config, ConfigParser, Conn, DrainConfig, InterfaceError, InterfaceState, Network, ParseOptions,
    PingError, StaticResolver, WgInterface,
};

const SERVER_CONFIG: &str = "[Interface]
PrivateKey = GInruesHOogIjjFsKCorYEAENAfYfPL/yH8ObFgyFUs=
ListenPort = 51820
Address = 10.131.132.1/24

[Peer]
PublicKey = kTUQWHx4Y3ZYMZQPnRarzlx0qnen3plDoI0z7s45in4=
AllowedIPs = 10.131.132.2/32
";

const CLIENT_CONFIG: &str = "[Interface]
PrivateKey = AEnvL9tVr+7JF0sMVjjzPjIxrrc/hoVJ5B82WWpVamI=
Address = 10.131.132.2/24
DNS = 1.1.1.1

[Peer]
PublicKey = Wh3yY7/fE3fyHJ8TOwLJ//CIRbgrlVl4bLQ+npNBSRU=
Endpoint = 127.0.0.1:51820
AllowedIPs = 0.0.0.0/0, ::/0
";

const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 131, 132, 1);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_drain() -> DrainConfig {
    DrainConfig {
        poll_interval: Duration::from_millis(1),
        idle_threshold: Duration::from_millis(5),
        max_wait: Duration::from_millis(500),
    }
}

async fn load(text: &str) -> anyhow::Result<Config> {
    let parser = ConfigParser::new(ParseOptions::default()).with_resolver(StaticResolver::new());
    Ok(parser.parse(text).await?)
}

async fn client(backend: &MockBackend) -> anyhow::Result<WgInterface<MockBackend>> {
    let config = load(CLIENT_CONFIG).await?;
    Ok(WgInterface::new(config, backend.clone()).with_drain_config(fast_drain()))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition never met");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_open_ping_close() -> anyhow::Result<()> {
    init_tracing();
    let backend = MockBackend::new();
    let iface = client(&backend).await?;

    iface.open()?;
    assert_eq!(iface.state(), InterfaceState::Open);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let latency = iface.ping4(SERVER_ADDR, Some(deadline)).await?;
    assert!(latency < Duration::from_secs(60));

    iface.close();
    assert_eq!(iface.state(), InterfaceState::Closed);

    let engine = backend.engines()[0].clone();
    wait_until(|| engine.closes() == 1).await;
    assert!(engine.peers_detached());
    Ok(())
}

#[tokio::test]
async fn test_engine_receives_control_form() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let server = WgInterface::new(load(SERVER_CONFIG).await?, backend.clone());

    server.open()?;

    let pushed = backend.engines()[0].pushed_config().unwrap_or_default();
    assert!(pushed.starts_with("private_key="));
    assert!(pushed.contains("listen_port=51820\n"));
    assert!(pushed.contains("allowed_ip=10.131.132.2/32\n"));
    assert!(!pushed.contains("endpoint="));

    let stack = &backend.stacks()[0];
    assert_eq!(stack.addrs, vec![IpAddr::V4(SERVER_ADDR)]);
    assert!(stack.dns.is_empty());
    assert_eq!(stack.mtu, 1420);
    Ok(())
}

#[tokio::test]
async fn test_socket_operations() -> anyhow::Result<()> {
    let backend = MockBackend::new()
        .with_host("files.internal", vec!["10.131.132.1".parse()?]);
    let iface = client(&backend).await?;
    iface.open()?;

    let conn = iface.dial(Network::Tcp4, "10.131.132.1:8080").await?;
    conn.send(b"GET / HTTP/1.0\r\n\r\n").await?;
    let mut buf = [0u8; 64];
    let n = conn.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"GET / HTTP/1.0\r\n\r\n");
    conn.close().await?;

    let addr: SocketAddr = "10.131.132.2:8080".parse()?;
    let listener = iface.listen(Network::Tcp, addr).await?;
    assert_eq!(listener.local_addr(), addr);

    for network in [Network::Udp, Network::Udp4, Network::Ping4] {
        let err = iface.listen(network, addr).await.unwrap_err();
        assert!(matches!(err, InterfaceError::UnsupportedNetwork(n) if n == network));
    }

    assert_eq!(iface.lookup_host("files.internal").await?, vec![IpAddr::V4(SERVER_ADDR)]);
    assert_eq!(iface.lookup_host("10.0.0.9").await?, vec!["10.0.0.9".parse::<IpAddr>()?]);
    Ok(())
}

#[tokio::test]
async fn test_failed_open_leaves_nothing_open() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    backend.fail_at(Some(Stage::BringUp));
    let iface = client(&backend).await?;

    assert!(matches!(iface.open(), Err(InterfaceError::Backend(_))));
    assert!(!iface.is_open());
    assert!(matches!(
        iface.dial(Network::Tcp, "10.131.132.1:80").await,
        Err(InterfaceError::NotOpen)
    ));

    let failed = backend.engines()[0].clone();
    wait_until(|| failed.closes() == 1).await;

    backend.fail_at(None);
    iface.open()?;
    assert!(iface.is_open());
    assert_eq!(backend.engines().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_ping_failures() -> anyhow::Result<()> {
    let silent = MockBackend::new().with_ping_mode(PingMode::Silent);
    let iface = client(&silent).await?;
    iface.open()?;

    let started = tokio::time::Instant::now();
    let deadline = started + Duration::from_millis(100);
    match iface.ping4(SERVER_ADDR, Some(deadline)).await {
        Err(InterfaceError::Ping(e)) => assert!(e.is_timeout()),
        other => panic!("expected ping timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));

    let garbage = MockBackend::new().with_ping_mode(PingMode::Garbage);
    let iface = client(&garbage).await?;
    iface.open()?;
    assert!(matches!(
        iface.ping4(SERVER_ADDR, None).await,
        Err(InterfaceError::Ping(PingError::Malformed(_)))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_while_in_use() -> anyhow::Result<()> {
    init_tracing();
    let backend = MockBackend::new();
    let iface = Arc::new(client(&backend).await?);
    iface.open()?;

    let mut workers = Vec::new();
    for _ in 0..4 {
        let iface = iface.clone();
        workers.push(tokio::spawn(async move {
            let mut closed_seen = false;
            for _ in 0..200 {
                match iface.dial(Network::Udp, "10.131.132.1:53").await {
                    Ok(_) => assert!(!closed_seen, "dial succeeded after close was observed"),
                    Err(InterfaceError::NotOpen) => closed_seen = true,
                    Err(e) => panic!("unexpected error: {}", e),
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(1)).await;
    iface.close();

    assert!(matches!(iface.lookup_host("files.internal").await, Err(InterfaceError::NotOpen)));
    assert!(matches!(
        iface.listen(Network::Tcp, "10.131.132.2:80".parse()?).await,
        Err(InterfaceError::NotOpen)
    ));

    for worker in workers {
        worker.await?;
    }

    let engine = backend.engines()[0].clone();
    wait_until(|| engine.closes() == 1).await;
    Ok(())
}

#[tokio::test]
async fn test_drain_waits_for_load() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let config = load(CLIENT_CONFIG).await?;
    let iface = WgInterface::new(config, backend.clone()).with_drain_config(DrainConfig {
        poll_interval: Duration::from_millis(1),
        idle_threshold: Duration::from_millis(10),
        max_wait: Duration::from_secs(30),
    });
    iface.open()?;

    let engine = backend.engines()[0].clone();
    engine.set_busy(true);
    drop(iface);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.closes(), 0);
    assert!(engine.peers_detached());

    engine.set_busy(false);
    wait_until(|| engine.closes() == 1).await;
    Ok(())
}
