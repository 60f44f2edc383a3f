use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use crate::frame::Frame;
use crate::test_util::test_peer_addr_from_number;
use crate::transport::PeerSender;

/// A [PeerSender] that records datagrams instead of sending them
#[derive(Debug)]
pub struct TrackingPeerSender {
    peer_addr: SocketAddr,
    tracker: Arc<RwLock<Vec<Bytes>>>,
}
impl Default for TrackingPeerSender {
    fn default() -> Self {
        TrackingPeerSender::new()
    }
}
impl TrackingPeerSender {
    pub fn new() -> Self {
        TrackingPeerSender::with_peer_addr(test_peer_addr_from_number(9876))
    }

    pub fn with_peer_addr(peer_addr: SocketAddr) -> Self {
        TrackingPeerSender {
            peer_addr,
            tracker: Default::default(),
        }
    }

    /// returns sent datagrams, clearing the internal buffer
    pub async fn sent_datagrams(&self) -> Vec<Bytes> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    /// returns sent frames, clearing the internal buffer
    pub async fn sent_frames(&self) -> Vec<Frame> {
        self.sent_datagrams().await
            .iter()
            .map(|d| Frame::deser(d).unwrap_or_else(|e| panic!("sent datagram {:?} is not a valid frame: {}", d, e)))
            .collect()
    }

    /// checks that exactly the expected frames were sent (in this order) since the last check
    pub async fn assert_frames_sent(&self, expected: &[Frame]) {
        assert_eq!(self.sent_frames().await, expected);
    }

    pub async fn assert_no_remaining_frames(&self) {
        assert!(
            self.tracker.read().await
                .is_empty()
        );
    }
}

#[async_trait]
impl PeerSender for TrackingPeerSender {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn send_datagram(&self, datagram: &[u8]) -> anyhow::Result<()> {
        self.tracker.write().await.push(Bytes::copy_from_slice(datagram));
        Ok(())
    }
}
