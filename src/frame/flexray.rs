use super::{BusFrame, BusKind, Direction, FormatError, SimTime, WireFrame, WireReader, WireWriter};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const MAX_FLEXRAY_PAYLOAD: usize = 254;
pub const MAX_FRAME_ID: u16 = 2047;
pub const MAX_CYCLE_COUNT: u8 = 63;
pub const MAX_HEADER_CRC: u16 = 0x7FF;
pub const MAX_PAYLOAD_WORDS: u8 = (MAX_FLEXRAY_PAYLOAD / 2) as u8;

const_assert!(MAX_FLEXRAY_PAYLOAD % 2 == 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlexrayChannel {
    A,
    B,
    AB,
}

impl FlexrayChannel {
    fn to_byte(self) -> u8 {
        match self {
            FlexrayChannel::A => 1,
            FlexrayChannel::B => 2,
            FlexrayChannel::AB => 3,
        }
    }

    fn from_byte(value: u8) -> Result<Self, FormatError> {
        match value {
            1 => Ok(FlexrayChannel::A),
            2 => Ok(FlexrayChannel::B),
            3 => Ok(FlexrayChannel::AB),
            _ => Err(FormatError::InvalidField {
                field: "channel",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlexrayHeaderFlags(pub u8);

impl FlexrayHeaderFlags {
    pub const SUPPRESSED: FlexrayHeaderFlags = FlexrayHeaderFlags(0x01);
    pub const SYNC: FlexrayHeaderFlags = FlexrayHeaderFlags(0x02);
    pub const NULL_FRAME: FlexrayHeaderFlags = FlexrayHeaderFlags(0x04);
    pub const PAYLOAD_PREAMBLE: FlexrayHeaderFlags = FlexrayHeaderFlags(0x08);
    pub const STARTUP: FlexrayHeaderFlags = FlexrayHeaderFlags(0x10);

    pub fn contains(self, other: FlexrayHeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for FlexrayHeaderFlags {
    type Output = FlexrayHeaderFlags;

    fn bitor(self, rhs: FlexrayHeaderFlags) -> FlexrayHeaderFlags {
        FlexrayHeaderFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayHeader {
    pub flags: FlexrayHeaderFlags,
    pub frame_id: u16,
    /// Payload length in 2-byte words.
    pub payload_length: u8,
    pub header_crc: u16,
    pub cycle_count: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlexrayFrame {
    pub channel: FlexrayChannel,
    pub header: FlexrayHeader,
    pub payload: ArrayVec<u8, MAX_FLEXRAY_PAYLOAD>,
    pub direction: Direction,
    pub timestamp: SimTime,
}

impl FlexrayFrame {
    /// Odd-length payloads are padded with a zero byte to a whole word.
    pub fn new(channel: FlexrayChannel, frame_id: u16, cycle_count: u8, payload: &[u8]) -> Result<Self, FormatError> {
        let mut buf = ArrayVec::<u8, MAX_FLEXRAY_PAYLOAD>::new();
        buf.try_extend_from_slice(payload).map_err(|_| FormatError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_FLEXRAY_PAYLOAD,
        })?;
        if buf.len() % 2 == 1 {
            buf.try_push(0).map_err(|_| FormatError::PayloadTooLarge {
                len: payload.len() + 1,
                max: MAX_FLEXRAY_PAYLOAD,
            })?;
        }
        Ok(Self {
            channel,
            header: FlexrayHeader {
                flags: FlexrayHeaderFlags::default(),
                frame_id,
                payload_length: (buf.len() / 2) as u8,
                header_crc: 0,
                cycle_count,
            },
            payload: buf,
            direction: Direction::Tx,
            timestamp: SimTime::ZERO,
        })
    }

    pub fn with_header_flags(mut self, flags: FlexrayHeaderFlags) -> Self {
        self.header.flags = flags;
        self
    }

    pub fn with_header_crc(mut self, crc: u16) -> Self {
        self.header.header_crc = crc;
        self
    }
}

impl BusFrame for FlexrayFrame {
    const KIND: BusKind = BusKind::Flexray;

    fn bus_id(&self) -> u32 {
        u32::from(self.header.frame_id)
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn timestamp(&self) -> SimTime {
        self.timestamp
    }

    fn stamp(&mut self, direction: Direction, timestamp: SimTime) {
        self.direction = direction;
        self.timestamp = timestamp;
    }

    fn validate(&self) -> Result<(), String> {
        let h = &self.header;
        if h.frame_id == 0 || h.frame_id > MAX_FRAME_ID {
            return Err(format!("frame id {} outside 1..={MAX_FRAME_ID}", h.frame_id));
        }
        if h.cycle_count > MAX_CYCLE_COUNT {
            return Err(format!("cycle count {} exceeds {MAX_CYCLE_COUNT}", h.cycle_count));
        }
        if h.header_crc > MAX_HEADER_CRC {
            return Err(format!("header crc {:#x} exceeds 11 bits", h.header_crc));
        }
        if usize::from(h.payload_length) * 2 != self.payload.len() {
            return Err(format!(
                "payload length of {} words does not match {} payload bytes",
                h.payload_length,
                self.payload.len()
            ));
        }
        Ok(())
    }

    fn encode(&self) -> WireFrame {
        let h = &self.header;
        WireWriter::with_capacity(16 + self.payload.len())
            .u8(self.channel.to_byte())
            .u8(h.flags.0)
            .u16(h.frame_id)
            .u8(h.payload_length)
            .u16(h.header_crc)
            .u8(h.cycle_count)
            .u8(self.direction.to_byte())
            .f64(self.timestamp.as_secs_f64())
            .payload(&self.payload)
            .finish(BusKind::Flexray)
    }

    fn decode(wire: &WireFrame) -> Result<Self, FormatError> {
        let mut r = WireReader::new(wire, BusKind::Flexray)?;
        let channel = FlexrayChannel::from_byte(r.u8()?)?;
        let header = FlexrayHeader {
            flags: FlexrayHeaderFlags(r.u8()?),
            frame_id: r.u16()?,
            payload_length: r.u8()?,
            header_crc: r.u16()?,
            cycle_count: r.u8()?,
        };
        let direction = Direction::from_byte(r.u8()?)?;
        let timestamp = r.f64()?;
        if !timestamp.is_finite() {
            return Err(FormatError::InvalidTime("timestamp"));
        }
        let bytes = r.payload(MAX_FLEXRAY_PAYLOAD)?;
        let mut payload = ArrayVec::new();
        payload.try_extend_from_slice(bytes).map_err(|_| FormatError::PayloadTooLarge {
            len: bytes.len(),
            max: MAX_FLEXRAY_PAYLOAD,
        })?;
        Ok(Self {
            channel,
            header,
            payload,
            direction,
            timestamp: SimTime::from_secs_f64(timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_payload_is_padded() {
        let frame = FlexrayFrame::new(FlexrayChannel::A, 10, 0, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload.as_slice(), &[1, 2, 3, 0]);
        assert_eq!(frame.header.payload_length, 2);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_fields() {
        let frame = FlexrayFrame::new(FlexrayChannel::AB, 0, 0, &[]).unwrap();
        assert!(frame.validate().is_err());
        let frame = FlexrayFrame::new(FlexrayChannel::AB, 5, 64, &[]).unwrap();
        assert!(frame.validate().is_err());
        let frame = FlexrayFrame::new(FlexrayChannel::AB, 5, 1, &[]).unwrap().with_header_crc(0x800);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let mut bytes = FlexrayFrame::new(FlexrayChannel::B, 7, 3, &[9, 9]).unwrap().encode().into_bytes();
        bytes[0] = 4;
        let wire = WireFrame::new(BusKind::Flexray, bytes);
        assert_eq!(
            FlexrayFrame::decode(&wire),
            Err(FormatError::InvalidField { field: "channel", value: 4 })
        );
    }
}
