use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use crate::config::LrcpConfig;
use crate::session_registry::{SessionAcceptor, SessionRegistry};
use crate::transport::PeerSender;

/// The largest payload that fits into a UDP datagram over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65507;

pub struct UdpPeerSender {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
}
impl UdpPeerSender {
    pub fn new(socket: Arc<UdpSocket>, peer_addr: SocketAddr) -> UdpPeerSender {
        UdpPeerSender { socket, peer_addr }
    }
}

#[async_trait]
impl PeerSender for UdpPeerSender {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn send_datagram(&self, datagram: &[u8]) -> anyhow::Result<()> {
        if datagram.len() > MAX_UDP_PAYLOAD {
            bail!("datagram of {} bytes exceeds the maximum UDP payload", datagram.len());
        }

        trace!("UDP socket: sending datagram to {:?}", self.peer_addr);
        let num_sent = self.socket.send_to(datagram, self.peer_addr).await?;
        if num_sent != datagram.len() {
            bail!("partial send: {} of {} bytes", num_sent, datagram.len());
        }
        Ok(())
    }
}

struct PeerEntry {
    datagrams: mpsc::Sender<Bytes>,
    last_activity: Instant,
}

/// Receives datagrams on a UDP socket and groups them by source address. Each peer gets its own
///  [SessionRegistry], running in a task of its own and fed through a bounded queue.
///
/// A peer that is silent for `peer_idle_timeout` is evicted: its queue is dropped, terminating
///  the registry and with it all the peer's sessions. A datagram from an evicted peer's address
///  is treated as coming from a new peer.
pub struct UdpServer {
    config: Arc<LrcpConfig>,
    socket: Arc<UdpSocket>,
}

impl UdpServer {
    pub async fn bind(config: LrcpConfig) -> anyhow::Result<UdpServer> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound UDP socket to {:?}", socket.local_addr()?);

        Ok(UdpServer {
            config: Arc::new(config),
            socket,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self, acceptor: Arc<dyn SessionAcceptor>) {
        info!("starting receive loop");

        let mut peers: FxHashMap<SocketAddr, PeerEntry> = FxHashMap::default();
        let mut buf = vec![0u8; self.config.receive_buffer_len];

        loop {
            let next_eviction = peers.values()
                .map(|p| p.last_activity + self.config.peer_idle_timeout)
                .min();

            select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((num_read, from)) => self.on_datagram(&mut peers, &acceptor, from, &buf[..num_read]),
                    Err(e) => error!("socket error: {}", e),
                },
                _ = sleep_until(next_eviction.unwrap_or_else(Instant::now)), if next_eviction.is_some() => {
                    self.evict_idle_peers(&mut peers);
                }
            }
        }
    }

    fn on_datagram(&self, peers: &mut FxHashMap<SocketAddr, PeerEntry>, acceptor: &Arc<dyn SessionAcceptor>, from: SocketAddr, datagram: &[u8]) {
        trace!("received datagram from {:?}: {:?}", from, String::from_utf8_lossy(datagram));

        let peer = peers.entry(from)
            .or_insert_with(|| self.spawn_peer(from, acceptor.clone()));
        peer.last_activity = Instant::now();

        match peer.datagrams.try_send(Bytes::copy_from_slice(datagram)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("datagram queue for {:?} is full - dropping", from);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("registry for {:?} terminated unexpectedly - dropping peer", from);
                peers.remove(&from);
            }
        }
    }

    fn spawn_peer(&self, peer_addr: SocketAddr, acceptor: Arc<dyn SessionAcceptor>) -> PeerEntry {
        debug!("new peer {:?}", peer_addr);

        let (datagrams, datagram_recv) = mpsc::channel(self.config.peer_datagram_queue_len);
        let peer_sender = Arc::new(UdpPeerSender::new(self.socket.clone(), peer_addr));
        let registry = SessionRegistry::new(self.config.clone(), peer_sender, acceptor);
        tokio::spawn(registry.run(datagram_recv).instrument(info_span!("peer", peer = %peer_addr)));

        PeerEntry {
            datagrams,
            last_activity: Instant::now(),
        }
    }

    fn evict_idle_peers(&self, peers: &mut FxHashMap<SocketAddr, PeerEntry>) {
        let now = Instant::now();
        peers.retain(|addr, peer| {
            let is_active = now.duration_since(peer.last_activity) < self.config.peer_idle_timeout;
            if !is_active {
                debug!("evicting idle peer {:?}", addr);
            }
            is_active
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use super::*;

    async fn loopback_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    #[tokio::test]
    async fn test_peer_sender_sends_datagram() {
        let socket = loopback_socket().await;
        let receiver = loopback_socket().await;
        let peer_sender = UdpPeerSender::new(socket.clone(), receiver.local_addr().unwrap());

        peer_sender.send_datagram(b"/ack/1/0/").await.unwrap();

        let mut buf = [0u8; 100];
        let (num_read, from) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf)).await
            .unwrap().unwrap();
        assert_eq!(&buf[..num_read], b"/ack/1/0/");
        assert_eq!(from, socket.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_peer_sender_rejects_oversized_datagram() {
        let socket = loopback_socket().await;
        let peer_sender = UdpPeerSender::new(socket.clone(), socket.local_addr().unwrap());

        assert!(peer_sender.send_datagram(&vec![b'x'; MAX_UDP_PAYLOAD + 1]).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut config = LrcpConfig::new("127.0.0.1:0".parse().unwrap());
        config.max_chunk_len = 0;
        assert!(UdpServer::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind() {
        let server = UdpServer::bind(LrcpConfig::new("127.0.0.1:0".parse().unwrap())).await.unwrap();
        let local_addr = server.local_addr().unwrap();
        assert!(local_addr.ip().is_loopback());
        assert_ne!(local_addr.port(), 0);
    }
}
