use super::{BusFrame, BusKind, Direction, FormatError, SimTime, WireFrame, WireReader, WireWriter};
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_LIN_ID: u8 = 0x3F;
pub const MAX_LIN_DATA: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinChecksumModel {
    #[default]
    Unknown,
    Enhanced,
    Classic,
}

impl LinChecksumModel {
    fn to_byte(self) -> u8 {
        match self {
            LinChecksumModel::Unknown => 0,
            LinChecksumModel::Enhanced => 1,
            LinChecksumModel::Classic => 2,
        }
    }

    fn from_byte(value: u8) -> Result<Self, FormatError> {
        match value {
            0 => Ok(LinChecksumModel::Unknown),
            1 => Ok(LinChecksumModel::Enhanced),
            2 => Ok(LinChecksumModel::Classic),
            _ => Err(FormatError::InvalidField {
                field: "checksum model",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinFrame {
    pub id: u8,
    pub checksum_model: LinChecksumModel,
    pub data: Vec<u8, MAX_LIN_DATA>,
    pub direction: Direction,
    pub timestamp: SimTime,
}

impl LinFrame {
    pub fn new(id: u8, checksum_model: LinChecksumModel, data: &[u8]) -> Result<Self, FormatError> {
        let data = Vec::from_slice(data).map_err(|_| FormatError::PayloadTooLarge {
            len: data.len(),
            max: MAX_LIN_DATA,
        })?;
        Ok(Self {
            id,
            checksum_model,
            data,
            direction: Direction::Tx,
            timestamp: SimTime::ZERO,
        })
    }

    /// Protected identifier: the 6-bit id with its two parity bits.
    pub fn protected_id(&self) -> u8 {
        let id = self.id & MAX_LIN_ID;
        let bit = |n: u8| (id >> n) & 1;
        let p0 = bit(0) ^ bit(1) ^ bit(2) ^ bit(4);
        let p1 = !(bit(1) ^ bit(3) ^ bit(4) ^ bit(5)) & 1;
        id | (p0 << 6) | (p1 << 7)
    }
}

impl BusFrame for LinFrame {
    const KIND: BusKind = BusKind::Lin;

    fn bus_id(&self) -> u32 {
        u32::from(self.id)
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
        if self.id > MAX_LIN_ID {
            return Err(format!("LIN id {:#x} exceeds {MAX_LIN_ID:#x}", self.id));
        }
        Ok(())
    }

    fn encode(&self) -> WireFrame {
        WireWriter::with_capacity(13 + self.data.len())
            .u8(self.id)
            .u8(self.checksum_model.to_byte())
            .u8(self.direction.to_byte())
            .f64(self.timestamp.as_secs_f64())
            .payload(&self.data)
            .finish(BusKind::Lin)
    }

    fn decode(wire: &WireFrame) -> Result<Self, FormatError> {
        let mut r = WireReader::new(wire, BusKind::Lin)?;
        let id = r.u8()?;
        let checksum_model = LinChecksumModel::from_byte(r.u8()?)?;
        let direction = Direction::from_byte(r.u8()?)?;
        let timestamp = r.f64()?;
        if !timestamp.is_finite() {
            return Err(FormatError::InvalidTime("timestamp"));
        }
        let mut frame = Self::new(id, checksum_model, r.payload(MAX_LIN_DATA)?)?;
        frame.stamp(direction, SimTime::from_secs_f64(timestamp));
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_id_parity() {
        // Known values from the LIN 2.x identifier table.
        assert_eq!(LinFrame::new(0x3C, LinChecksumModel::Classic, &[]).unwrap().protected_id(), 0x3C);
        assert_eq!(LinFrame::new(0x3D, LinChecksumModel::Classic, &[]).unwrap().protected_id(), 0x7D);
        assert_eq!(LinFrame::new(0x00, LinChecksumModel::Classic, &[]).unwrap().protected_id(), 0x80);
    }

    #[test]
    fn test_id_range_validated() {
        let frame = LinFrame::new(0x40, LinChecksumModel::Enhanced, &[1]).unwrap();
        assert!(frame.validate().is_err());
        assert!(LinFrame::new(0x10, LinChecksumModel::Enhanced, &[0; 9]).is_err());
    }
}
