//! Wire codec. One message per connection: a type byte followed by zero, one
//! or two fixed-size address chunks.
//!
//! An address chunk is `[len:1][text:MAX_ADDR_LEN]`, the text NUL padded, so
//! every message kind has a fixed frame length known from its type byte.

use std::fmt;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, Error};

/// Longest textual socket address, an IPv6 one with a scope id:
/// `[ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff%4294967295]:65535`.
pub const MAX_ADDR_LEN: usize = 58;
pub const ADDR_CHUNK_LEN: usize = MAX_ADDR_LEN + 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MessageType {
    Ping,
    JoinRequest,
    JoinBroadcast,
    LeaveRequest,
    Dead,
    IndirectPing,
    Ack,
    Nack,
}

impl MessageType {
    pub fn get_code(&self) -> u8 {
        match self {
            MessageType::Ping => 1,
            MessageType::JoinRequest => 2,
            MessageType::JoinBroadcast => 3,
            MessageType::LeaveRequest => 4,
            MessageType::Dead => 5,
            MessageType::IndirectPing => 6,
            MessageType::Ack => 7,
            MessageType::Nack => 8,
        }
    }

    pub fn from_code(code: u8) -> Result<MessageType, CodecError> {
        match code {
            1 => Ok(MessageType::Ping),
            2 => Ok(MessageType::JoinRequest),
            3 => Ok(MessageType::JoinBroadcast),
            4 => Ok(MessageType::LeaveRequest),
            5 => Ok(MessageType::Dead),
            6 => Ok(MessageType::IndirectPing),
            7 => Ok(MessageType::Ack),
            8 => Ok(MessageType::Nack),
            _ => Err(CodecError::UnknownType(code)),
        }
    }

    fn addr_count(&self) -> usize {
        match self {
            MessageType::Ack | MessageType::Nack => 0,
            MessageType::Dead | MessageType::IndirectPing => 2,
            _ => 1,
        }
    }

    /// Total encoded size including the type byte.
    pub fn frame_len(&self) -> usize {
        1 + self.addr_count() * ADDR_CHUNK_LEN
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "ping",
            MessageType::JoinRequest => "join-req",
            MessageType::JoinBroadcast => "join-req-broadcast",
            MessageType::LeaveRequest => "leave-req",
            MessageType::Dead => "dead",
            MessageType::IndirectPing => "indirect-ping",
            MessageType::Ack => "ack",
            MessageType::Nack => "nack",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Message {
    Ping { sender: SocketAddr },
    JoinRequest { sender: SocketAddr },
    JoinBroadcast { target: SocketAddr },
    LeaveRequest { sender: SocketAddr },
    Dead { sender: SocketAddr, target: SocketAddr },
    IndirectPing { sender: SocketAddr, suspect: SocketAddr },
    Ack,
    Nack,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping { .. } => MessageType::Ping,
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinBroadcast { .. } => MessageType::JoinBroadcast,
            Message::LeaveRequest { .. } => MessageType::LeaveRequest,
            Message::Dead { .. } => MessageType::Dead,
            Message::IndirectPing { .. } => MessageType::IndirectPing,
            Message::Ack => MessageType::Ack,
            Message::Nack => MessageType::Nack,
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let kind = self.message_type();
        let mut buf = BytesMut::with_capacity(kind.frame_len());
        buf.put_u8(kind.get_code());
        match *self {
            Message::Ping { sender }
            | Message::JoinRequest { sender }
            | Message::LeaveRequest { sender } => put_addr(&mut buf, sender)?,
            Message::JoinBroadcast { target } => put_addr(&mut buf, target)?,
            Message::Dead { sender, target } => {
                put_addr(&mut buf, sender)?;
                put_addr(&mut buf, target)?;
            }
            Message::IndirectPing { sender, suspect } => {
                put_addr(&mut buf, sender)?;
                put_addr(&mut buf, suspect)?;
            }
            Message::Ack | Message::Nack => {}
        }
        Ok(buf.freeze())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Message, CodecError> {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated { need: 1, got: 0 });
        }
        let kind = MessageType::from_code(buf.get_u8())?;
        let need = kind.frame_len() - 1;
        if buf.remaining() < need {
            return Err(CodecError::Truncated { need, got: buf.remaining() });
        }
        let msg = match kind {
            MessageType::Ping => Message::Ping { sender: get_addr(buf)? },
            MessageType::JoinRequest => Message::JoinRequest { sender: get_addr(buf)? },
            MessageType::JoinBroadcast => Message::JoinBroadcast { target: get_addr(buf)? },
            MessageType::LeaveRequest => Message::LeaveRequest { sender: get_addr(buf)? },
            MessageType::Dead => Message::Dead { sender: get_addr(buf)?, target: get_addr(buf)? },
            MessageType::IndirectPing => Message::IndirectPing {
                sender: get_addr(buf)?,
                suspect: get_addr(buf)?,
            },
            MessageType::Ack => Message::Ack,
            MessageType::Nack => Message::Nack,
        };
        Ok(msg)
    }

    /// Reads exactly one frame off the stream. The type byte decides how many
    /// more bytes are consumed.
    pub async fn read_from<R>(reader: &mut R) -> Result<Message, Error>
        where R: AsyncRead + Unpin,
    {
        let code = reader.read_u8().await.map_err(|err| Error::io("read msg-type", err))?;
        let kind = MessageType::from_code(code)?;
        let mut frame = BytesMut::zeroed(kind.frame_len());
        frame[0] = code;
        reader.read_exact(&mut frame[1..]).await.map_err(|err| Error::io("read msg body", err))?;
        Ok(Message::decode(&mut frame.freeze())?)
    }
}

fn put_addr(buf: &mut BytesMut, addr: SocketAddr) -> Result<(), CodecError> {
    let text = addr.to_string();
    if text.len() > MAX_ADDR_LEN {
        return Err(CodecError::AddressTooLong { len: text.len(), max: MAX_ADDR_LEN });
    }
    buf.put_u8(text.len() as u8);
    buf.put_slice(text.as_bytes());
    buf.put_bytes(0, MAX_ADDR_LEN - text.len());
    Ok(())
}

// Copies out of the receive buffer; the returned address never aliases it.
fn get_addr<B: Buf>(buf: &mut B) -> Result<SocketAddr, CodecError> {
    let len = buf.get_u8() as usize;
    if len > MAX_ADDR_LEN {
        return Err(CodecError::AddressTooLong { len, max: MAX_ADDR_LEN });
    }
    let mut chunk = [0u8; MAX_ADDR_LEN];
    buf.copy_to_slice(&mut chunk);
    let text = std::str::from_utf8(&chunk[..len]).map_err(|_| CodecError::InvalidUtf8)?;
    text.parse().map_err(|_| CodecError::InvalidAddress(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddrV6;

    use super::*;

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    #[test]
    fn frames_have_fixed_length_per_type() {
        let ping = Message::Ping { sender: addr("127.0.0.1:1") }.encode().unwrap();
        let dead = Message::Dead { sender: addr("127.0.0.1:1"), target: addr("[::1]:65535") }
            .encode()
            .unwrap();
        assert_eq!(ping.len(), 1 + ADDR_CHUNK_LEN);
        assert_eq!(dead.len(), 1 + 2 * ADDR_CHUNK_LEN);
        assert_eq!(Message::Ack.encode().unwrap().as_ref(), &[7]);
        assert_eq!(Message::Nack.encode().unwrap().as_ref(), &[8]);
    }

    #[test]
    fn two_address_message_keeps_sender_then_target() {
        let expected = Message::Dead { sender: addr("10.0.0.1:7946"), target: addr("10.0.0.2:7946") };
        let mut bytes = expected.encode().unwrap();
        assert_eq!(bytes[0], MessageType::Dead.get_code());
        assert_eq!(Message::decode(&mut bytes).unwrap(), expected);
    }

    #[test]
    fn longest_ipv6_address_fits() {
        let plain = addr("[ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff]:65535");
        let ip = match plain {
            SocketAddr::V6(v6) => *v6.ip(),
            SocketAddr::V4(_) => unreachable!(),
        };
        let scoped = SocketAddr::V6(SocketAddrV6::new(ip, 65535, 0, u32::MAX));
        assert_eq!(scoped.to_string().len(), MAX_ADDR_LEN);

        for long in [plain, scoped] {
            let msg = Message::IndirectPing { sender: long, suspect: scoped };
            let mut bytes = msg.encode().unwrap();
            assert_eq!(Message::decode(&mut bytes).unwrap(), msg);
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert_eq!(Message::decode(&mut &[0u8][..]), Err(CodecError::UnknownType(0)));
        assert_eq!(Message::decode(&mut &[42u8, 1, 2][..]), Err(CodecError::UnknownType(42)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut frame = vec![MessageType::Ping.get_code(), (MAX_ADDR_LEN + 1) as u8];
        frame.resize(MessageType::Ping.frame_len(), b'1');
        assert_eq!(
            Message::decode(&mut &frame[..]),
            Err(CodecError::AddressTooLong { len: MAX_ADDR_LEN + 1, max: MAX_ADDR_LEN })
        );
    }

    #[test]
    fn truncated_and_garbled_frames_are_rejected() {
        let full = Message::Ping { sender: addr("127.0.0.1:8080") }.encode().unwrap();
        assert_eq!(
            Message::decode(&mut &full[..10]),
            Err(CodecError::Truncated { need: ADDR_CHUNK_LEN, got: 9 })
        );
        assert_eq!(Message::decode(&mut &[0u8; 0][..]), Err(CodecError::Truncated { need: 1, got: 0 }));

        let mut garbled = full.to_vec();
        garbled[2] = b'x';
        assert_eq!(
            Message::decode(&mut &garbled[..]),
            Err(CodecError::InvalidAddress("x27.0.0.1:8080".to_owned()))
        );

        garbled[2] = 0xff;
        assert_eq!(Message::decode(&mut &garbled[..]), Err(CodecError::InvalidUtf8));
    }

    #[tokio::test]
    async fn read_from_consumes_exactly_one_frame() {
        let first = Message::LeaveRequest { sender: addr("127.0.0.1:9000") };
        let mut wire = first.encode().unwrap().to_vec();
        wire.extend_from_slice(&Message::Ack.encode().unwrap());
        let mut reader = &wire[..];

        assert_eq!(Message::read_from(&mut reader).await.unwrap(), first);
        assert_eq!(Message::read_from(&mut reader).await.unwrap(), Message::Ack);
        let err = Message::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Io { op: "read msg-type", .. }));
    }

    #[tokio::test]
    async fn read_from_reports_unknown_type_without_reading_on() {
        let wire = [99u8, 1, 2, 3];
        let mut reader = &wire[..];
        let err = Message::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Codec(CodecError::UnknownType(99))));
        assert_eq!(reader.len(), 3);
    }
}
