use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{anyhow, bail};
use bytes::{Buf, Bytes, BytesMut};
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use crate::config::LrcpConfig;
use crate::frame::Frame;
use crate::transport::PeerSender;
use crate::util::safe_converter::{checked_offset_add, PrecheckedCast, SafeCast};

/// An inbound protocol event, routed to a session by its peer's registry
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEvent {
    Data { position: u32, payload: Bytes },
    Ack { length: u32 },
}

/// The registry's side of a session.
///
/// Dropping the handle closes the session without notifying the peer. This is how both an
///  explicit `close` from the peer and the peer's eviction are handled.
pub struct SessionHandle {
    session_id: u32,
    events: mpsc::Sender<SessionEvent>,
    closed: Arc<AtomicBool>,
}
impl SessionHandle {
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// A session that is closed stays closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.events.is_closed()
    }

    /// Hands an event to the session without waiting. A session that is busy (e.g. waiting for
    ///  its application to catch up) must not hold up the other sessions of the same peer, so
    ///  events that do not fit into its queue are dropped like a lost datagram.
    pub fn on_event(&self, event: SessionEvent) -> EventDelivery {
        match self.events.try_send(event) {
            Ok(()) => EventDelivery::Accepted,
            Err(TrySendError::Full(_)) => EventDelivery::QueueFull,
            Err(TrySendError::Closed(_)) => EventDelivery::SessionClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventDelivery {
    Accepted,
    QueueFull,
    SessionClosed,
}

/// The application's side of a session: an ordered queue of the bytes received from the peer,
///  and an entry point for bytes to be delivered to the peer.
///
/// The inbound queue ends (`recv()` returns `None`) when the session is closed, for whatever
///  reason.
pub struct SessionStream {
    session_id: u32,
    inbound: mpsc::Receiver<Bytes>,
    writer: SessionWriter,
}
impl SessionStream {
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    pub async fn send(&self, data: impl Into<Bytes>) -> anyhow::Result<()> {
        self.writer.send(data).await
    }

    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }
}

#[derive(Clone, Debug)]
pub struct SessionWriter {
    session_id: u32,
    outbound: mpsc::Sender<Bytes>,
}
impl SessionWriter {
    /// Submits data for delivery to the peer, waiting while the session's outbound queue is
    ///  full. This fails once the session is closed.
    pub async fn send(&self, data: impl Into<Bytes>) -> anyhow::Result<()> {
        if self.outbound.is_closed() {
            bail!("session {} is closed", self.session_id);
        }
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        self.outbound.send(data).await
            .map_err(|_| anyhow!("session {} is closed", self.session_id))
    }
}

/// Creates a session and spawns its event loop
pub fn spawn_session(config: Arc<LrcpConfig>, session_id: u32, peer_sender: Arc<dyn PeerSender>) -> (SessionHandle, SessionStream) {
    let (event_send, event_recv) = mpsc::channel(config.session_event_queue_len);
    let (inbound_send, inbound_recv) = mpsc::channel(config.app_queue_len);
    let (outbound_send, outbound_recv) = mpsc::channel(config.app_queue_len);
    let closed = Arc::new(AtomicBool::new(false));

    let span = info_span!("session", session_id, peer = %peer_sender.peer_addr());
    let session = Session::new(config, session_id, peer_sender, event_recv, inbound_send, outbound_recv, closed.clone());
    tokio::spawn(session.run().instrument(span));

    let handle = SessionHandle {
        session_id,
        events: event_send,
        closed,
    };
    let stream = SessionStream {
        session_id,
        inbound: inbound_recv,
        writer: SessionWriter {
            session_id,
            outbound: outbound_send,
        },
    };
    (handle, stream)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Disposition {
    Continue,
    Terminate { notify_peer: bool },
}

struct Session {
    config: Arc<LrcpConfig>,
    session_id: u32,
    peer_sender: Arc<dyn PeerSender>,

    /// The number of bytes delivered to the application, which is also the position of the next
    ///  byte we expect from the peer. There is no buffering of data beyond a gap.
    received_offset: u32,

    /// The number of outbound bytes the peer confirmed
    acknowledged_offset: u32,
    /// Bytes that were sent but not acknowledged yet, starting at `acknowledged_offset`
    unacked: BytesMut,

    events: mpsc::Receiver<SessionEvent>,
    inbound: mpsc::Sender<Bytes>,
    outbound: mpsc::Receiver<Bytes>,
    /// `false` once all of the application's writers are dropped
    outbound_open: bool,
    closed: Arc<AtomicBool>,

    /// fixed at creation, activity does not extend a session's lifetime
    expires_at: Instant,
    retransmit_at: Option<Instant>,
}

impl Session {
    fn new(
        config: Arc<LrcpConfig>,
        session_id: u32,
        peer_sender: Arc<dyn PeerSender>,
        events: mpsc::Receiver<SessionEvent>,
        inbound: mpsc::Sender<Bytes>,
        outbound: mpsc::Receiver<Bytes>,
        closed: Arc<AtomicBool>,
    ) -> Session {
        let expires_at = Instant::now() + config.session_lifetime;
        Session {
            config,
            session_id,
            peer_sender,
            received_offset: 0,
            acknowledged_offset: 0,
            unacked: BytesMut::new(),
            events,
            inbound,
            outbound,
            outbound_open: true,
            closed,
            expires_at,
            retransmit_at: None,
        }
    }

    async fn run(mut self) {
        debug!("session opened");

        let notify_peer = loop {
            let retransmit_at = self.retransmit_at.unwrap_or(self.expires_at);

            let disposition = select! {
                event = self.events.recv() => match event {
                    Some(SessionEvent::Data { position, payload }) => self.on_data(position, payload).await,
                    Some(SessionEvent::Ack { length }) => self.on_ack(length).await,
                    None => self.on_closed_by_registry(),
                },
                data = self.outbound.recv(), if self.outbound_open => self.on_outbound(data).await,
                _ = sleep_until(retransmit_at), if self.retransmit_at.is_some() => self.on_retransmission_timeout().await,
                _ = sleep_until(self.expires_at) => {
                    info!("session lifetime expired");
                    Disposition::Terminate { notify_peer: false }
                }
            };

            if let Disposition::Terminate { notify_peer } = disposition {
                break notify_peer;
            }
        };

        self.events.close();
        self.outbound.close();
        self.terminate(notify_peer).await;
    }

    /// Dropping the session closes the inbound queue, signalling end-of-stream to the application
    async fn terminate(self, notify_peer: bool) {
        self.closed.store(true, Ordering::Release);
        if notify_peer {
            self.send_frame(Frame::Close { session_id: self.session_id }).await;
        }
        debug!("session closed");
    }

    async fn on_data(&mut self, position: u32, payload: Bytes) -> Disposition {
        if position > self.received_offset {
            debug!("missed {} bytes before position {} - requesting retransmission", position - self.received_offset, position);
        }
        else {
            let already_received: usize = (self.received_offset - position).safe_cast();
            if payload.len() > already_received {
                let new_data = payload.slice(already_received..);
                let Some(new_received_offset) = checked_offset_add(self.received_offset, new_data.len()) else {
                    error!("inbound stream exceeds the maximum offset - closing session");
                    return Disposition::Terminate { notify_peer: true };
                };

                trace!("delivering {} bytes to the application", new_data.len());
                let disposition = self.deliver(new_data).await;
                if disposition != Disposition::Continue {
                    return disposition;
                }
                self.received_offset = new_received_offset;
            }
            else {
                trace!("ignoring duplicate data at position {}", position);
            }
        }

        self.send_frame(Frame::Ack { session_id: self.session_id, length: self.received_offset }).await;
        Disposition::Continue
    }

    /// Waits for room in the application's queue rather than dropping data: once acknowledged,
    ///  data will not be re-sent by the peer.
    ///
    /// The application may in turn be waiting for room in the outbound queue, so outbound data
    ///  is processed while waiting. So are acks, retransmissions and the session's termination.
    ///  Further inbound data is not processed but acknowledged with the current offset, so the
    ///  peer re-sends it later.
    async fn deliver(&mut self, data: Bytes) -> Disposition {
        let inbound = self.inbound.clone();
        let permit = inbound.reserve();
        tokio::pin!(permit);

        loop {
            let retransmit_at = self.retransmit_at.unwrap_or(self.expires_at);

            select! {
                reserved = &mut permit => return match reserved {
                    Ok(permit) => {
                        permit.send(data);
                        Disposition::Continue
                    }
                    Err(_) => {
                        warn!("application stopped receiving - closing session");
                        Disposition::Terminate { notify_peer: true }
                    }
                },
                event = self.events.recv() => {
                    let disposition = match event {
                        Some(SessionEvent::Data { position, .. }) => {
                            trace!("data at position {} while waiting for the application - acknowledging current offset", position);
                            self.send_frame(Frame::Ack { session_id: self.session_id, length: self.received_offset }).await;
                            Disposition::Continue
                        }
                        Some(SessionEvent::Ack { length }) => self.on_ack(length).await,
                        None => self.on_closed_by_registry(),
                    };
                    if disposition != Disposition::Continue {
                        return disposition;
                    }
                },
                outbound = self.outbound.recv(), if self.outbound_open => {
                    let disposition = self.on_outbound(outbound).await;
                    if disposition != Disposition::Continue {
                        return disposition;
                    }
                },
                _ = sleep_until(retransmit_at), if self.retransmit_at.is_some() => {
                    self.on_retransmission_timeout().await;
                },
                _ = sleep_until(self.expires_at) => {
                    info!("session lifetime expired while waiting for the application");
                    return Disposition::Terminate { notify_peer: false };
                }
            }
        }
    }

    fn on_closed_by_registry(&self) -> Disposition {
        debug!("session closed by the registry");
        Disposition::Terminate { notify_peer: false }
    }

    async fn on_outbound(&mut self, data: Option<Bytes>) -> Disposition {
        match data {
            Some(data) => self.on_send(data).await,
            None => {
                trace!("application finished sending");
                self.outbound_open = false;
                Disposition::Continue
            }
        }
    }

    async fn on_ack(&mut self, length: u32) -> Disposition {
        if length <= self.acknowledged_offset {
            trace!("ignoring duplicate ack for {}", length);
            return Disposition::Continue;
        }

        let newly_acknowledged: usize = (length - self.acknowledged_offset).safe_cast();
        if newly_acknowledged > self.unacked.len() {
            error!("peer acknowledged {} bytes, but only {} were sent - closing session", length, self.sent_offset());
            return Disposition::Terminate { notify_peer: true };
        }

        self.unacked.advance(newly_acknowledged);
        self.acknowledged_offset = length;

        if self.unacked.is_empty() {
            trace!("all data acknowledged");
            self.retransmit_at = None;
        }
        else {
            debug!("retransmitting {} bytes after partial ack", self.unacked.len());
            self.transmit_unacked().await;
        }
        Disposition::Continue
    }

    async fn on_send(&mut self, data: Bytes) -> Disposition {
        let position = self.sent_offset();
        if checked_offset_add(position, data.len()).is_none() {
            error!("outbound stream exceeds the maximum offset - closing session");
            return Disposition::Terminate { notify_peer: true };
        }

        trace!("sending {} bytes at position {}", data.len(), position);
        self.transmit(position, &data).await;
        self.unacked.extend_from_slice(&data);
        self.restart_retransmission_timer();
        Disposition::Continue
    }

    async fn on_retransmission_timeout(&mut self) -> Disposition {
        if self.unacked.is_empty() {
            self.retransmit_at = None;
        }
        else {
            debug!("retransmitting {} bytes after timeout", self.unacked.len());
            self.transmit_unacked().await;
        }
        Disposition::Continue
    }

    /// NB: `acknowledged_offset + unacked.len()` never exceeds 31 bits because `on_send` checks
    ///  every submission
    fn sent_offset(&self) -> u32 {
        self.acknowledged_offset + self.unacked.len().prechecked_cast()
    }

    fn restart_retransmission_timer(&mut self) {
        self.retransmit_at = Some(Instant::now() + self.config.retransmission_interval);
    }

    async fn transmit_unacked(&mut self) {
        self.transmit(self.acknowledged_offset, &self.unacked).await;
        self.restart_retransmission_timer();
    }

    async fn transmit(&self, position: u32, data: &[u8]) {
        let max_chunks = self.config.max_chunks_per_flush.unwrap_or(usize::MAX);

        for (i, chunk) in data.chunks(self.config.max_chunk_len).take(max_chunks).enumerate() {
            let chunk_offset: u32 = (i * self.config.max_chunk_len).prechecked_cast();
            self.send_frame(Frame::Data {
                session_id: self.session_id,
                position: position + chunk_offset,
                payload: Bytes::copy_from_slice(chunk),
            }).await;
        }
    }

    async fn send_frame(&self, frame: Frame) {
        trace!("sending {}", frame);
        if let Err(e) = self.peer_sender.send_datagram(&frame.to_bytes()).await {
            warn!("error sending {} frame: {}", frame.command(), e);
        }
    }
}
