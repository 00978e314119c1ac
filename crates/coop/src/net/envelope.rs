use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 17;
pub const MAX_DATAGRAM_SIZE: usize = 1400;
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryMode {
    Unreliable = 0,
    ReliableUnordered = 1,
    ReliableOrdered = 2,
    Sequenced = 3,
}

impl DeliveryMode {
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            DeliveryMode::ReliableUnordered | DeliveryMode::ReliableOrdered
        )
    }
}

impl TryFrom<u8> for DeliveryMode {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryMode::Unreliable),
            1 => Ok(DeliveryMode::ReliableUnordered),
            2 => Ok(DeliveryMode::ReliableOrdered),
            3 => Ok(DeliveryMode::Sequenced),
            other => Err(EnvelopeError::UnknownMode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("datagram too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },
    #[error("unknown delivery mode {0}")]
    UnknownMode(u8),
}

/// `[mode u8][sequence u32][ack u32][ack_bits u32][channel_seq u32]`, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub mode: DeliveryMode,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
    pub channel_seq: u32,
}

impl EnvelopeHeader {
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(self.mode as u8);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.ack);
        buf.put_u32_le(self.ack_bits);
        buf.put_u32_le(self.channel_seq);
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), EnvelopeError> {
        if data.len() < HEADER_LEN {
            return Err(EnvelopeError::BufferTooShort {
                need: HEADER_LEN,
                have: data.len(),
            });
        }

        let mut buf = data;
        let mode = DeliveryMode::try_from(buf.get_u8())?;
        let header = Self {
            mode,
            sequence: buf.get_u32_le(),
            ack: buf.get_u32_le(),
            ack_bits: buf.get_u32_le(),
            channel_seq: buf.get_u32_le(),
        };
        Ok((header, buf))
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}
