use std::net::SocketAddr;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info_span, trace, Instrument};
use crate::session::SessionStream;
use crate::session_registry::SessionAcceptor;

/// Replies to every complete line with the line's bytes in reverse order. Data after the last
///  newline is kept until the line is completed, or discarded when the session ends.
pub async fn reverse_lines(mut stream: SessionStream) {
    let mut buf = BytesMut::new();

    while let Some(data) = stream.recv().await {
        buf.extend_from_slice(&data);

        while let Some(idx) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(idx + 1);
            let reversed = reverse_line(&line[..idx]);
            trace!("reversed line of {} bytes", idx);

            if let Err(e) = stream.send(reversed).await {
                debug!("{}", e);
                return;
            }
        }
    }
    debug!("session ended with {} bytes of incomplete line", buf.len());
}

fn reverse_line(line: &[u8]) -> Bytes {
    let mut reversed = Vec::with_capacity(line.len() + 1);
    reversed.extend(line.iter().rev());
    reversed.push(b'\n');
    reversed.into()
}

/// Runs [reverse_lines] for every new session
#[derive(Default)]
pub struct LineReversal;

impl SessionAcceptor for LineReversal {
    fn on_session_opened(&self, peer_addr: SocketAddr, stream: SessionStream) {
        let span = info_span!("line_reversal", session_id = stream.session_id(), peer = %peer_addr);
        tokio::spawn(reverse_lines(stream).instrument(span));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use rstest::rstest;
    use tokio::runtime::Builder;
    use super::*;
    use crate::frame::Frame;
    use crate::session::{spawn_session, EventDelivery, SessionEvent};
    use crate::test_util::{settle, test_config, TrackingPeerSender};
    use crate::transport::PeerSender;

    #[rstest]
    #[case::simple(b"hello", b"olleh\n")]
    #[case::empty(b"", b"\n")]
    #[case::palindrome(b"abba", b"abba\n")]
    #[case::bytes_not_chars(b"\xc3\xa4", b"\xa4\xc3\n")]
    fn test_reverse_line(#[case] line: &[u8], #[case] expected: &[u8]) {
        assert_eq!(reverse_line(line).as_ref(), expected);
    }

    #[rstest]
    #[case::single_line(vec![b"hello\n".as_slice()], vec![b"olleh\n".as_slice()])]
    #[case::split_line(vec![b"hel".as_slice(), b"lo\n".as_slice()], vec![b"olleh\n".as_slice()])]
    #[case::two_lines_in_one_chunk(vec![b"ab\ncd\n".as_slice()], vec![b"ba\n".as_slice(), b"dc\n".as_slice()])]
    #[case::incomplete_line(vec![b"ab\ncd".as_slice()], vec![b"ba\n".as_slice()])]
    #[case::empty_line(vec![b"\n".as_slice()], vec![b"\n".as_slice()])]
    #[case::with_slashes(vec![b"/a\\b/\n".as_slice()], vec![b"/b\\a/\n".as_slice()])]
    fn test_reverse_lines(#[case] received: Vec<&[u8]>, #[case] expected_replies: Vec<&[u8]>) {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let peer_sender = Arc::new(TrackingPeerSender::new());
            let (handle, stream) = spawn_session(Arc::new(test_config()), 1, peer_sender.clone());
            LineReversal.on_session_opened(peer_sender.peer_addr(), stream);

            let mut position = 0;
            for data in received {
                let delivery = handle.on_event(SessionEvent::Data { position, payload: Bytes::copy_from_slice(data) });
                assert_eq!(delivery, EventDelivery::Accepted);
                position += data.len() as u32;
                settle().await;
            }

            let replies = peer_sender.sent_frames().await
                .into_iter()
                .filter_map(|frame| match frame {
                    Frame::Data { payload, .. } => Some(payload),
                    _ => None,
                })
                .collect::<Vec<_>>();
            let expected_replies = expected_replies.into_iter()
                .map(Bytes::copy_from_slice)
                .collect::<Vec<_>>();
            assert_eq!(replies, expected_replies);
        });
    }
}
