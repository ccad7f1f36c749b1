use super::{BusFrame, BusKind, Direction, FormatError, SimTime, WireFrame, WireReader, WireWriter};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const MAX_CAN_PAYLOAD: usize = 64;
pub const MAX_CLASSIC_PAYLOAD: usize = 8;
pub const MAX_STANDARD_ID: u32 = 0x7FF;
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

// id | flags | sdt | vcid | af | direction | timestamp | dlc
pub const CAN_HEADER_SIZE: usize = 4 + 4 + 1 + 1 + 4 + 1 + 8 + 2;

const_assert!(CAN_HEADER_SIZE == 25);
const_assert!(MAX_CAN_PAYLOAD <= u16::MAX as usize);

pub type CanPayload = Vec<u8, MAX_CAN_PAYLOAD>;

/// Open CAN flag bitset. Bits without a name survive a decode/encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CanFrameFlags(pub u32);

impl CanFrameFlags {
    pub const NONE: CanFrameFlags = CanFrameFlags(0);
    pub const RTR: CanFrameFlags = CanFrameFlags(1 << 4);
    pub const IDE: CanFrameFlags = CanFrameFlags(1 << 9);
    pub const FDF: CanFrameFlags = CanFrameFlags(1 << 12);
    pub const BRS: CanFrameFlags = CanFrameFlags(1 << 13);
    pub const ESI: CanFrameFlags = CanFrameFlags(1 << 14);
    pub const XLF: CanFrameFlags = CanFrameFlags(1 << 15);
    pub const SEC: CanFrameFlags = CanFrameFlags(1 << 16);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CanFrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CanFrameFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CanFrameFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: CanFrameFlags, enabled: bool) {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl core::ops::BitOr for CanFrameFlags {
    type Output = CanFrameFlags;

    fn bitor(self, rhs: CanFrameFlags) -> CanFrameFlags {
        CanFrameFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for CanFrameFlags {
    fn bitor_assign(&mut self, rhs: CanFrameFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanFrame {
    pub id: u32,
    pub flags: CanFrameFlags,
    pub sdt: u8,
    pub vcid: u8,
    pub af: u32,
    pub payload: CanPayload,
    pub direction: Direction,
    pub timestamp: SimTime,
}

impl CanFrame {
    /// Builds a classic or FD data frame. Fails if the payload exceeds 64 bytes.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, FormatError> {
        let payload = CanPayload::from_slice(payload).map_err(|_| FormatError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_CAN_PAYLOAD,
        })?;
        Ok(Self {
            id,
            flags: CanFrameFlags::NONE,
            sdt: 0,
            vcid: 0,
            af: 0,
            payload,
            direction: Direction::Tx,
            timestamp: SimTime::ZERO,
        })
    }

    pub fn with_flags(mut self, flags: CanFrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// XL-only fields; callers must also set [`CanFrameFlags::XLF`].
    pub fn with_xl_fields(mut self, sdt: u8, vcid: u8, af: u32) -> Self {
        self.sdt = sdt;
        self.vcid = vcid;
        self.af = af;
        self
    }

    pub fn dlc(&self) -> u16 {
        self.payload.len() as u16
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(CanFrameFlags::IDE)
    }

    pub fn is_fd(&self) -> bool {
        self.flags.contains(CanFrameFlags::FDF)
    }

    pub fn is_xl(&self) -> bool {
        self.flags.contains(CanFrameFlags::XLF)
    }
}

impl BusFrame for CanFrame {
    const KIND: BusKind = BusKind::Can;

    fn bus_id(&self) -> u32 {
        self.id
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
        if !self.is_xl() && (self.sdt != 0 || self.vcid != 0 || self.af != 0) {
            return Err("sdt, vcid and af require the XLF flag".into());
        }
        if !self.is_fd() && self.flags.contains(CanFrameFlags::BRS) {
            return Err("BRS requires the FDF flag".into());
        }
        if !self.is_fd() && self.flags.contains(CanFrameFlags::ESI) {
            return Err("ESI requires the FDF flag".into());
        }
        if !self.is_fd() && !self.is_xl() && self.payload.len() > MAX_CLASSIC_PAYLOAD {
            return Err(format!(
                "classic frame carries {} bytes, at most {MAX_CLASSIC_PAYLOAD} allowed",
                self.payload.len()
            ));
        }
        let max_id = if self.is_extended() { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if self.id > max_id {
            return Err(format!("id {:#x} exceeds {max_id:#x}", self.id));
        }
        Ok(())
    }

    fn encode(&self) -> WireFrame {
        WireWriter::with_capacity(CAN_HEADER_SIZE + self.payload.len())
            .u32(self.id)
            .u32(self.flags.bits())
            .u8(self.sdt)
            .u8(self.vcid)
            .u32(self.af)
            .u8(self.direction.to_byte())
            .f64(self.timestamp.as_secs_f64())
            .payload(&self.payload)
            .finish(BusKind::Can)
    }

    fn decode(wire: &WireFrame) -> Result<Self, FormatError> {
        let mut r = WireReader::new(wire, BusKind::Can)?;
        let id = r.u32()?;
        let flags = CanFrameFlags(r.u32()?);
        let sdt = r.u8()?;
        let vcid = r.u8()?;
        let af = r.u32()?;
        let direction = Direction::from_byte(r.u8()?)?;
        let timestamp = r.f64()?;
        if !timestamp.is_finite() {
            return Err(FormatError::InvalidTime("timestamp"));
        }
        let payload = r.payload(MAX_CAN_PAYLOAD)?;
        Ok(Self {
            id,
            flags,
            sdt,
            vcid,
            af,
            // length was checked against MAX_CAN_PAYLOAD above
            payload: CanPayload::from_slice(payload).map_err(|_| FormatError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_CAN_PAYLOAD,
            })?,
            direction,
            timestamp: SimTime::from_secs_f64(timestamp),
        })
    }
}

impl core::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} 0x{:02X}: {:?}", self.timestamp, self.id, self.payload.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_header_layout() {
        let frame = CanFrame::new(0x700, &[1, 2, 3]).unwrap();
        let wire = frame.encode();
        assert_eq!(wire.len(), CAN_HEADER_SIZE + 3);
        assert_eq!(&wire.as_bytes()[0..4], &0x700u32.to_le_bytes());
        assert_eq!(&wire.as_bytes()[23..25], &3u16.to_le_bytes());
    }

    #[test]
    fn test_flags_bit_positions() {
        assert_eq!(CanFrameFlags::RTR.bits(), 0x10);
        assert_eq!(CanFrameFlags::IDE.bits(), 0x200);
        assert_eq!(CanFrameFlags::SEC.bits(), 0x10000);
        let mut flags = CanFrameFlags::FDF | CanFrameFlags::BRS;
        flags.set(CanFrameFlags::BRS, false);
        assert_eq!(flags, CanFrameFlags::FDF);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert!(matches!(
            CanFrame::new(1, &[0; 65]),
            Err(FormatError::PayloadTooLarge { len: 65, max: 64 })
        ));
    }
}
