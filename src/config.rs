use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use crate::frame::DATA_FRAME_OVERHEAD;

#[derive(Debug, Clone)]
pub struct LrcpConfig {
    /// The UDP address the server listens on
    pub self_addr: SocketAddr,

    /// Unacknowledged data is re-sent after this interval. There is no backoff, and retries are
    ///  only bounded by `session_lifetime`.
    pub retransmission_interval: Duration,

    /// Sessions are closed this long after they were created, regardless of activity. The peer
    ///  is not notified and finds out through a `close` reply to its next frame.
    pub session_lifetime: Duration,

    /// A peer that sends no datagrams for this long is evicted, closing all its sessions
    ///  without sending frames
    pub peer_idle_timeout: Duration,

    /// Maximum number of payload bytes in a single `data` frame. This must leave room for
    ///  worst-case escaping (every byte doubled) and the frame header inside `max_frame_len`.
    pub max_chunk_len: usize,

    /// Maximum number of `data` frames sent in one go, either for newly submitted data or for a
    ///  retransmission. Data beyond that is sent by subsequent retransmissions. `None` sends
    ///  everything right away.
    pub max_chunks_per_flush: Option<usize>,

    /// Datagrams longer than this are not valid frames. This is also the upper bound for frames
    ///  we send.
    pub max_frame_len: usize,

    /// Capacity of the queues between a session and its application, in either direction
    pub app_queue_len: usize,

    /// Capacity of the queue of inbound protocol events per session
    pub session_event_queue_len: usize,

    /// Capacity of the per-peer queue of received datagrams. Datagrams arriving while it is full
    ///  are dropped, which the protocol handles like any other packet loss.
    pub peer_datagram_queue_len: usize,

    /// Size of the UDP receive buffer
    pub receive_buffer_len: usize,
}

impl LrcpConfig {
    pub const DEFAULT_PORT: u16 = 50_000;

    pub fn new(self_addr: SocketAddr) -> LrcpConfig {
        LrcpConfig {
            self_addr,
            retransmission_interval: Duration::from_secs(1),
            session_lifetime: Duration::from_secs(60),
            peer_idle_timeout: Duration::from_secs(60),
            max_chunk_len: 480,
            max_chunks_per_flush: Some(5),
            max_frame_len: 1000,
            app_queue_len: 20,
            session_event_queue_len: 16,
            peer_datagram_queue_len: 20,
            receive_buffer_len: 65536,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_chunk_len == 0 {
            bail!("max chunk length must not be 0");
        }
        if 2 * self.max_chunk_len + DATA_FRAME_OVERHEAD > self.max_frame_len {
            bail!("max chunk length {} does not fit into a frame of {} bytes when fully escaped", self.max_chunk_len, self.max_frame_len);
        }
        if self.max_chunks_per_flush == Some(0) {
            bail!("max chunks per flush must not be 0");
        }
        if self.receive_buffer_len < self.max_frame_len {
            bail!("receive buffer must be able to hold a frame of maximum length");
        }
        if self.retransmission_interval.is_zero() {
            bail!("retransmission interval must not be 0");
        }
        if self.session_lifetime.is_zero() || self.peer_idle_timeout.is_zero() {
            bail!("timeouts must not be 0");
        }
        if self.app_queue_len == 0 || self.session_event_queue_len == 0 || self.peer_datagram_queue_len == 0 {
            bail!("queue lengths must not be 0");
        }

        Ok(())
    }
}
