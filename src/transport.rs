pub mod udp;

use std::net::SocketAddr;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// This is the outbound half of a peer's datagram channel, shared by all sessions of that peer.
///  It is an abstraction over the UDP socket, introduced to facilitate mocking the I/O part away
///  for testing.
///
/// Implementations must be safe for concurrent use by all of a peer's sessions. Sending is a
///  hand-off: it must not wait for anything the peer does.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerSender: Send + Sync + 'static {
    fn peer_addr(&self) -> SocketAddr;

    async fn send_datagram(&self, datagram: &[u8]) -> anyhow::Result<()>;
}
