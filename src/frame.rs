use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::types::{Nonce, SeqNo, SessionKey};

pub const MESSAGE_TYPE_DATA: u8 = 0;
pub const MESSAGE_TYPE_CONTROL: u8 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ControlType {
    Nack = 0,
    Reset = 1,
    Resetted = 2,
    SessionEnd = 3,
    SessionEnded = 4,
    WindowEnd = 5,
    WindowEnded = 6,
    WindowUpdate = 7,
    WindowUpdated = 8,
}

fn check_remaining(buf: &impl Buf, len: usize, what: &str) -> anyhow::Result<()> {
    if buf.remaining() < len {
        bail!("buffer underflow reading {}: {} bytes required, {} remaining", what, len, buf.remaining());
    }
    Ok(())
}

fn padding_for(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// A single fragment on the wire. The payload is padded to a multiple of 8 bytes; the padding is
///  not counted in the length field and dropped on deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFrame {
    pub nonce: Nonce,
    pub sk: SessionKey,
    pub seq: SeqNo,
    pub payload: Bytes,
}

impl DataFrame {
    /// message type, nonce, session key, sequence number, payload length
    pub const HEADER_LEN: usize = size_of::<u8>() + size_of::<Nonce>() + size_of::<SessionKey>() + size_of::<SeqNo>() + size_of::<u16>();

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len() + padding_for(self.payload.len())
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(MESSAGE_TYPE_DATA);
        buf.put_u32(self.nonce);
        buf.put_u16(self.sk);
        buf.put_u16(self.seq);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.put_bytes(0, padding_for(self.payload.len()));
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// expects the message type to be consumed already
    fn deser_body(buf: &mut impl Buf) -> anyhow::Result<DataFrame> {
        check_remaining(buf, Self::HEADER_LEN - 1, "DATA header")?;
        let nonce = buf.get_u32();
        let sk = buf.get_u16();
        let seq = buf.get_u16();
        let payload_len = buf.get_u16() as usize;

        check_remaining(buf, payload_len, "DATA payload")?;
        let payload = buf.copy_to_bytes(payload_len);

        // padding is optional on the receiving side
        let padding = padding_for(payload_len).min(buf.remaining());
        buf.advance(padding);

        Ok(DataFrame {
            nonce,
            sk,
            seq,
            payload,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    Nack { nonce: Nonce, sk: SessionKey, start: SeqNo, end: SeqNo },
    Reset,
    Resetted,
    SessionEnd { nonce: Nonce, sk: SessionKey },
    SessionEnded { nonce: Nonce, sk: SessionKey },
    WindowEnd { nonce: Nonce, sk: SessionKey, seq: SeqNo },
    WindowEnded { nonce: Nonce, sk: SessionKey },
    WindowUpdate { nonce: Nonce, sk: SessionKey },
    WindowUpdated { nonce: Nonce, sk: SessionKey },
}

impl ControlFrame {
    const SESSION_LEN: usize = size_of::<Nonce>() + size_of::<SessionKey>();

    pub fn control_type(&self) -> ControlType {
        match self {
            ControlFrame::Nack { .. } => ControlType::Nack,
            ControlFrame::Reset => ControlType::Reset,
            ControlFrame::Resetted => ControlType::Resetted,
            ControlFrame::SessionEnd { .. } => ControlType::SessionEnd,
            ControlFrame::SessionEnded { .. } => ControlType::SessionEnded,
            ControlFrame::WindowEnd { .. } => ControlType::WindowEnd,
            ControlFrame::WindowEnded { .. } => ControlType::WindowEnded,
            ControlFrame::WindowUpdate { .. } => ControlType::WindowUpdate,
            ControlFrame::WindowUpdated { .. } => ControlType::WindowUpdated,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(MESSAGE_TYPE_CONTROL);
        buf.put_u8(self.control_type().into());

        match *self {
            ControlFrame::Reset | ControlFrame::Resetted => {}
            ControlFrame::Nack { nonce, sk, start, end } => {
                buf.put_u32(nonce);
                buf.put_u16(sk);
                buf.put_u16(start);
                buf.put_u16(end);
            }
            ControlFrame::WindowEnd { nonce, sk, seq } => {
                buf.put_u32(nonce);
                buf.put_u16(sk);
                buf.put_u16(seq);
            }
            ControlFrame::SessionEnd { nonce, sk } |
            ControlFrame::SessionEnded { nonce, sk } |
            ControlFrame::WindowEnded { nonce, sk } |
            ControlFrame::WindowUpdate { nonce, sk } |
            ControlFrame::WindowUpdated { nonce, sk } => {
                buf.put_u32(nonce);
                buf.put_u16(sk);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        self.ser(&mut buf);
        buf.freeze()
    }

    /// expects the message type to be consumed already
    fn deser_body(buf: &mut impl Buf) -> anyhow::Result<ControlFrame> {
        check_remaining(buf, 1, "control type")?;
        let raw_control_type = buf.get_u8();
        let control_type = match ControlType::try_from(raw_control_type) {
            Ok(t) => t,
            Err(_) => bail!("unknown control type {}", raw_control_type),
        };

        match control_type {
            ControlType::Reset => return Ok(ControlFrame::Reset),
            ControlType::Resetted => return Ok(ControlFrame::Resetted),
            _ => {}
        }

        check_remaining(buf, Self::SESSION_LEN, "control session")?;
        let nonce = buf.get_u32();
        let sk = buf.get_u16();

        let frame = match control_type {
            ControlType::Nack => {
                check_remaining(buf, 2 * size_of::<SeqNo>(), "NACK range")?;
                let start = buf.get_u16();
                let end = buf.get_u16();
                ControlFrame::Nack { nonce, sk, start, end }
            }
            ControlType::WindowEnd => {
                check_remaining(buf, size_of::<SeqNo>(), "WE sequence number")?;
                ControlFrame::WindowEnd { nonce, sk, seq: buf.get_u16() }
            }
            ControlType::SessionEnd => ControlFrame::SessionEnd { nonce, sk },
            ControlType::SessionEnded => ControlFrame::SessionEnded { nonce, sk },
            ControlType::WindowEnded => ControlFrame::WindowEnded { nonce, sk },
            ControlType::WindowUpdate => ControlFrame::WindowUpdate { nonce, sk },
            ControlType::WindowUpdated => ControlFrame::WindowUpdated { nonce, sk },
            ControlType::Reset | ControlType::Resetted => unreachable!("handled above"),
        };
        Ok(frame)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Control(ControlFrame),
}

impl Frame {
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Frame> {
        check_remaining(buf, 1, "message type")?;
        match buf.get_u8() {
            MESSAGE_TYPE_DATA => Ok(Frame::Data(DataFrame::deser_body(buf)?)),
            MESSAGE_TYPE_CONTROL => Ok(Frame::Control(ControlFrame::deser_body(buf)?)),
            other => bail!("unknown message type {}", other),
        }
    }
}
