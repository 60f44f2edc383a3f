use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, span, trace, Instrument, Level};
use uuid::Uuid;
use crate::config::LrcpConfig;
use crate::frame::Frame;
use crate::session::{spawn_session, EventDelivery, SessionEvent, SessionHandle, SessionStream};
use crate::transport::PeerSender;

/// The application's entry point: it is called for every newly opened session and takes
///  ownership of the session's stream
pub trait SessionAcceptor: Send + Sync + 'static {
    fn on_session_opened(&self, peer_addr: SocketAddr, stream: SessionStream);
}

impl<F> SessionAcceptor for F
where F: Fn(SocketAddr, SessionStream) + Send + Sync + 'static
{
    fn on_session_opened(&self, peer_addr: SocketAddr, stream: SessionStream) {
        self(peer_addr, stream)
    }
}

/// Owns the sessions of a single peer, dispatching the peer's inbound frames to them.
///
/// The registry is the only place sessions are created or removed. Sessions that closed
///  themselves (lifetime expiry, protocol violation) are removed lazily the next time their id
///  is referenced.
pub struct SessionRegistry {
    config: Arc<LrcpConfig>,
    peer_sender: Arc<dyn PeerSender>,
    acceptor: Arc<dyn SessionAcceptor>,
    sessions: FxHashMap<u32, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(config: Arc<LrcpConfig>, peer_sender: Arc<dyn PeerSender>, acceptor: Arc<dyn SessionAcceptor>) -> SessionRegistry {
        SessionRegistry {
            config,
            peer_sender,
            acceptor,
            sessions: FxHashMap::default(),
        }
    }

    /// Processes the peer's datagrams until the stream ends, which means the peer was evicted.
    ///  All remaining sessions are then closed without sending frames.
    pub async fn run(mut self, mut datagrams: mpsc::Receiver<Bytes>) {
        while let Some(datagram) = datagrams.recv().await {
            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            self.on_datagram(&datagram)
                .instrument(span)
                .await;
        }

        debug!("peer evicted - closing {} sessions", self.sessions.len());
        self.sessions.clear();
    }

    pub async fn on_datagram(&mut self, datagram: &[u8]) {
        if datagram.len() > self.config.max_frame_len {
            debug!("received datagram of {} bytes, exceeding the maximum frame length - dropping", datagram.len());
            return;
        }

        let frame = match Frame::deser(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("received malformed frame {:?} - dropping: {}", String::from_utf8_lossy(datagram), e);
                return;
            }
        };
        trace!("received {}", frame);

        match frame {
            Frame::Connect { session_id } => self.on_connect(session_id).await,
            Frame::Data { session_id, position, payload } => self.dispatch(session_id, SessionEvent::Data { position, payload }).await,
            Frame::Ack { session_id, length } => self.dispatch(session_id, SessionEvent::Ack { length }).await,
            Frame::Close { session_id } => self.on_close(session_id).await,
        }
    }

    async fn on_connect(&mut self, session_id: u32) {
        if self.live_session(session_id).is_none() {
            debug!("opening session {}", session_id);
            let (handle, stream) = spawn_session(self.config.clone(), session_id, self.peer_sender.clone());
            self.sessions.insert(session_id, handle);
            self.acceptor.on_session_opened(self.peer_sender.peer_addr(), stream);
        }
        else {
            trace!("connect for existing session {}", session_id);
        }

        self.send_frame(Frame::Ack { session_id, length: 0 }).await;
    }

    async fn on_close(&mut self, session_id: u32) {
        if self.sessions.remove(&session_id).is_some() {
            debug!("session {} closed by peer", session_id);
        }
        self.send_frame(Frame::Close { session_id }).await;
    }

    async fn dispatch(&mut self, session_id: u32, event: SessionEvent) {
        let delivery = match self.live_session(session_id) {
            Some(session) => session.on_event(event),
            None => EventDelivery::SessionClosed,
        };

        match delivery {
            EventDelivery::Accepted => {}
            EventDelivery::QueueFull => {
                debug!("event queue of session {} is full - dropping frame", session_id);
            }
            EventDelivery::SessionClosed => {
                debug!("frame for unknown session {} - replying with close", session_id);
                self.sessions.remove(&session_id);
                self.send_frame(Frame::Close { session_id }).await;
            }
        }
    }

    /// Returns the session for an id if it is still open, removing it if it closed itself
    fn live_session(&mut self, session_id: u32) -> Option<&SessionHandle> {
        if self.sessions.get(&session_id)?.is_closed() {
            trace!("removing closed session {}", session_id);
            self.sessions.remove(&session_id);
            return None;
        }
        self.sessions.get(&session_id)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn send_frame(&self, frame: Frame) {
        trace!("sending {}", frame);
        if let Err(e) = self.peer_sender.send_datagram(&frame.to_bytes()).await {
            debug!("error sending {} frame: {}", frame.command(), e);
        }
    }
}
