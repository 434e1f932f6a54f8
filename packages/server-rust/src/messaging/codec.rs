//! nsqd TCP protocol (V2) framing.
//!
//! Client commands are newline-terminated text, optionally followed by a
//! 4-byte big-endian length and a body. Server frames are
//! `[size: u32][frame type: u32][data]`, where `size` counts the type field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fleet_core::MessageId;
use tokio_util::codec::{Decoder, Encoder};

/// Protocol magic sent once right after connecting.
pub const MAGIC_V2: &[u8] = b"  V2";
/// Response payload nsqd uses for heartbeats; the client must answer `NOP`.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";
/// Response payload acknowledging `SUB` / `PUB` / `DPUB`.
pub const OK: &[u8] = b"OK";

const FRAME_RESPONSE: u32 = 0;
const FRAME_ERROR: u32 = 1;
const FRAME_MESSAGE: u32 = 2;

/// Frames larger than this are treated as corruption.
const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Message frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub timestamp_ns: i64,
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

/// Frame received from nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(RawMessage),
}

impl Frame {
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Response(data) if data.as_ref() == HEARTBEAT)
    }
}

/// Command sent to nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Magic,
    Sub { topic: String, channel: String },
    Rdy(u32),
    Fin(MessageId),
    Req { id: MessageId, delay_ms: u64 },
    Nop,
    Pub { topic: String, body: Bytes },
    Dpub { topic: String, delay_ms: u64, body: Bytes },
    Cls,
}

/// Codec for one nsqd connection.
#[derive(Debug, Clone)]
pub struct NsqCodec {
    max_frame: usize,
}

impl Default for NsqCodec {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

fn protocol_error(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

impl Decoder for NsqCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if size < 4 {
            return Err(protocol_error(format!("frame size {size} too small")));
        }
        if size > self.max_frame {
            return Err(protocol_error(format!("frame size {size} exceeds limit")));
        }
        if src.len() < 4 + size {
            src.reserve(4 + size - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame_type = src.get_u32();
        let mut data = src.split_to(size - 4).freeze();

        match frame_type {
            FRAME_RESPONSE => Ok(Some(Frame::Response(data))),
            FRAME_ERROR => Ok(Some(Frame::Error(data))),
            FRAME_MESSAGE => {
                if data.len() < 26 {
                    return Err(protocol_error("message frame shorter than header"));
                }
                let timestamp_ns = data.get_i64();
                let attempts = data.get_u16();
                let id = MessageId::from_slice(&data.split_to(16))
                    .ok_or_else(|| protocol_error("bad message id"))?;
                Ok(Some(Frame::Message(RawMessage {
                    timestamp_ns,
                    attempts,
                    id,
                    body: data,
                })))
            }
            other => Err(protocol_error(format!("unknown frame type {other}"))),
        }
    }
}

fn put_body(dst: &mut BytesMut, body: &[u8]) -> Result<(), std::io::Error> {
    let len = u32::try_from(body.len()).map_err(|_| protocol_error("body too large"))?;
    dst.put_u32(len);
    dst.put_slice(body);
    Ok(())
}

impl Encoder<Command> for NsqCodec {
    type Error = std::io::Error;

    fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match cmd {
            Command::Magic => dst.put_slice(MAGIC_V2),
            Command::Sub { topic, channel } => {
                dst.put_slice(format!("SUB {topic} {channel}\n").as_bytes());
            }
            Command::Rdy(count) => dst.put_slice(format!("RDY {count}\n").as_bytes()),
            Command::Fin(id) => {
                dst.put_slice(b"FIN ");
                dst.put_slice(id.as_bytes());
                dst.put_u8(b'\n');
            }
            Command::Req { id, delay_ms } => {
                dst.put_slice(b"REQ ");
                dst.put_slice(id.as_bytes());
                dst.put_slice(format!(" {delay_ms}\n").as_bytes());
            }
            Command::Nop => dst.put_slice(b"NOP\n"),
            Command::Pub { topic, body } => {
                dst.put_slice(format!("PUB {topic}\n").as_bytes());
                put_body(dst, &body)?;
            }
            Command::Dpub {
                topic,
                delay_ms,
                body,
            } => {
                dst.put_slice(format!("DPUB {topic} {delay_ms}\n").as_bytes());
                put_body(dst, &body)?;
            }
            Command::Cls => dst.put_slice(b"CLS\n"),
        }
        Ok(())
    }
}
