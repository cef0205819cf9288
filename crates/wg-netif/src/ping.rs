//! ICMP echo latency check
//!
//! Sends one ICMPv4 echo request through a virtual stack's `ping4` socket
//! and times the matching reply.

use crate::backend::{Conn, NetStack, Network};
use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Slice, Icmpv4Type};
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// Longest a single ping may take
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of every echo payload
const PING_MARKER: &[u8] = b"wgnetif";

/// Largest reply read from the socket
const MAX_REPLY: usize = 1500;

/// Ping errors
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("Ping dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error("Ping write failed: {0}")]
    Write(#[source] io::Error),

    #[error("Ping read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Ping timed out")]
    Timeout,

    #[error("Malformed ping reply")]
    Malformed(#[source] etherparse::err::LenError),

    #[error("Invalid ping reply")]
    InvalidReply,

    #[error("Ping socket close failed: {0}")]
    Close(#[source] io::Error),
}

impl PingError {
    /// Did the ping run out of time?
    pub fn is_timeout(&self) -> bool {
        match self {
            PingError::Timeout => true,
            PingError::Dial(e) | PingError::Write(e) | PingError::Read(e) => {
                e.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

/// One echo request and the payload its reply must carry
struct EchoRequest {
    echo: IcmpEchoHeader,
    payload: Vec<u8>,
}

impl EchoRequest {
    fn random() -> Self {
        let mut payload = PING_MARKER.to_vec();
        payload.extend_from_slice(format!("{:x}", rand::random::<u32>()).as_bytes());

        Self {
            echo: IcmpEchoHeader {
                id: rand::random(),
                seq: rand::random(),
            },
            payload,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let header = Icmpv4Header::with_checksum(Icmpv4Type::EchoRequest(self.echo), &self.payload);
        let mut packet = header.to_bytes().to_vec();
        packet.extend_from_slice(&self.payload);
        packet
    }

    /// Check a reply; the identifier may be rewritten by the stack
    fn check_reply(&self, reply: &[u8]) -> Result<(), PingError> {
        let slice = Icmpv4Slice::from_slice(reply).map_err(PingError::Malformed)?;
        match slice.icmp_type() {
            Icmpv4Type::EchoReply(echo)
                if echo.seq == self.echo.seq && slice.payload() == self.payload.as_slice() =>
            {
                Ok(())
            }
            _ => Err(PingError::InvalidReply),
        }
    }
}

/// Measure the round trip of one echo exchange with `target`.
///
/// The ping gives up at the earlier of `deadline` and [`PING_TIMEOUT`]
/// from now. The socket is closed on every path; a close failure is only
/// reported when the exchange itself succeeded.
pub async fn ping4<S: NetStack + ?Sized>(
    stack: &S,
    target: Ipv4Addr,
    deadline: Option<Instant>,
) -> Result<Duration, PingError> {
    let limit = Instant::now() + PING_TIMEOUT;
    let deadline = deadline.map_or(limit, |d| d.min(limit));

    let conn = timeout_at(deadline, stack.dial(Network::Ping4, &target.to_string()))
        .await
        .map_err(|_| PingError::Timeout)?
        .map_err(PingError::Dial)?;

    let result = exchange(&conn, deadline).await;
    let closed = conn.close().await;

    match (result, closed) {
        (Ok(_), Err(e)) => Err(PingError::Close(e)),
        (result, _) => {
            debug!("Ping {}: {:?}", target, result);
            result
        }
    }
}

async fn exchange<C: Conn + ?Sized>(conn: &C, deadline: Instant) -> Result<Duration, PingError> {
    let request = EchoRequest::random();
    let packet = request.to_bytes();

    let started = Instant::now();
    timeout_at(deadline, conn.send(&packet))
        .await
        .map_err(|_| PingError::Timeout)?
        .map_err(PingError::Write)?;

    let mut buf = vec![0u8; MAX_REPLY];
    let n = timeout_at(deadline, conn.recv(&mut buf))
        .await
        .map_err(|_| PingError::Timeout)?
        .map_err(PingError::Read)?;

    request.check_reply(&buf[..n])?;
    Ok(started.elapsed())
}
