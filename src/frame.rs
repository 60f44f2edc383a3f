use std::fmt::{Display, Formatter};
use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

/// All numbers on the wire (session ids, positions, lengths) are non-negative and fit into 31 bits
pub const MAX_U31: u32 = 0x7fff_ffff;

/// The number of bytes a `data` frame adds around its (escaped) payload in the worst case:
///  `/data/` + 10 digits + `/` + 10 digits + `/` + payload + `/`
pub const DATA_FRAME_OVERHEAD: usize = 6 + 10 + 1 + 10 + 1 + 1;

const DELIMITER: u8 = b'/';
const ESCAPE: u8 = b'\\';

/// A single protocol message. Each frame travels in a datagram of its own.
///
/// The textual wire representation is
/// ```ascii
/// /connect/SESSION_ID/
/// /data/SESSION_ID/POSITION/ESCAPED_PAYLOAD/
/// /ack/SESSION_ID/LENGTH/
/// /close/SESSION_ID/
/// ```
/// with `\` and `/` in field content escaped as `\\` and `\/`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    Connect { session_id: u32 },
    Data { session_id: u32, position: u32, payload: Bytes },
    Ack { session_id: u32, length: u32 },
    Close { session_id: u32 },
}

impl Frame {
    pub fn session_id(&self) -> u32 {
        match self {
            Frame::Connect { session_id } => *session_id,
            Frame::Data { session_id, .. } => *session_id,
            Frame::Ack { session_id, .. } => *session_id,
            Frame::Close { session_id } => *session_id,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Data { .. } => "data",
            Frame::Ack { .. } => "ack",
            Frame::Close { .. } => "close",
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(DELIMITER);
        buf.put_slice(self.command().as_bytes());
        buf.put_u8(DELIMITER);
        put_number(buf, self.session_id());
        buf.put_u8(DELIMITER);

        match self {
            Frame::Connect { .. } | Frame::Close { .. } => {}
            Frame::Data { position, payload, .. } => {
                put_number(buf, *position);
                buf.put_u8(DELIMITER);
                put_escaped(buf, payload);
                buf.put_u8(DELIMITER);
            }
            Frame::Ack { length, .. } => {
                put_number(buf, *length);
                buf.put_u8(DELIMITER);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    fn serialized_len(&self) -> usize {
        match self {
            Frame::Data { payload, .. } => DATA_FRAME_OVERHEAD + escaped_len(payload),
            _ => 32,
        }
    }

    pub fn deser(buf: &[u8]) -> anyhow::Result<Frame> {
        let fields = split_fields(buf)?;
        if fields.len() < 2 {
            bail!("frame has {} fields, expected at least 2", fields.len());
        }

        let session_id = parse_u31(&fields[1])?;

        let frame = match (fields[0].as_slice(), fields.len()) {
            (b"connect", 2) => Frame::Connect { session_id },
            (b"data", 4) => Frame::Data {
                session_id,
                position: parse_u31(&fields[2])?,
                payload: Bytes::from(fields[3].clone()),
            },
            (b"ack", 3) => Frame::Ack {
                session_id,
                length: parse_u31(&fields[2])?,
            },
            (b"close", 2) => Frame::Close { session_id },
            (command, num_fields) => bail!("unsupported command {:?} with {} fields", String::from_utf8_lossy(command), num_fields),
        };
        Ok(frame)
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// The length of a field after escaping
pub fn escaped_len(data: &[u8]) -> usize {
    data.len() + data.iter()
        .filter(|&&b| b == DELIMITER || b == ESCAPE)
        .count()
}

fn put_escaped(buf: &mut BytesMut, data: &[u8]) {
    buf.reserve(escaped_len(data));
    for &b in data {
        if b == DELIMITER || b == ESCAPE {
            buf.put_u8(ESCAPE);
        }
        buf.put_u8(b);
    }
}

fn put_number(buf: &mut BytesMut, n: u32) {
    buf.put_slice(n.to_string().as_bytes());
}

/// Splits a frame on unescaped delimiters, unescaping the fields' contents.
///
/// NB: A backslash that does not precede `\` or `/` has no special meaning and is kept as it is
fn split_fields(buf: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    if buf.len() < 2 || buf[0] != DELIMITER || buf[buf.len() - 1] != DELIMITER {
        bail!("frame is not enclosed in delimiters");
    }

    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut escaped = false;

    for &b in &buf[1..] {
        if escaped {
            if b != DELIMITER && b != ESCAPE {
                current.push(ESCAPE);
            }
            current.push(b);
            escaped = false;
            continue;
        }

        match b {
            ESCAPE => escaped = true,
            DELIMITER => fields.push(std::mem::take(&mut current)),
            _ => current.push(b),
        }
    }

    // the final delimiter was escaped, so it does not terminate the frame
    if escaped || !current.is_empty() {
        bail!("frame does not end with an unescaped delimiter");
    }
    Ok(fields)
}

fn parse_u31(field: &[u8]) -> anyhow::Result<u32> {
    if field.is_empty() || field.len() > 10 || !field.iter().all(u8::is_ascii_digit) {
        bail!("not a valid number: {:?}", String::from_utf8_lossy(field));
    }

    let value = field.iter()
        .fold(0u64, |acc, &digit| acc * 10 + (digit - b'0') as u64);
    if value > MAX_U31 as u64 {
        bail!("number {} exceeds 31 bits", value);
    }
    Ok(value as u32)
}
