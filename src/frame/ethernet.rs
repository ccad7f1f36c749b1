use super::{BusFrame, BusKind, Direction, FormatError, SimTime, WireFrame, WireReader, WireWriter};
use serde::{Deserialize, Serialize};

pub const MAC_LEN: usize = 6;
pub const ETHERNET_HEADER_LEN: usize = 2 * MAC_LEN + 2;
pub const MAX_ETHERNET_PAYLOAD: usize = 1500;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub type MacAddress = [u8; MAC_LEN];

pub const BROADCAST_MAC: MacAddress = [0xFF; MAC_LEN];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthernetFrame {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub ether_type: u16,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub direction: Direction,
    pub timestamp: SimTime,
}

impl EthernetFrame {
    pub fn new(
        destination: MacAddress,
        source: MacAddress,
        ether_type: u16,
        payload: &[u8],
    ) -> Result<Self, FormatError> {
        if payload.len() > MAX_ETHERNET_PAYLOAD {
            return Err(FormatError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_ETHERNET_PAYLOAD,
            });
        }
        Ok(Self {
            destination,
            source,
            ether_type,
            payload: payload.to_vec(),
            direction: Direction::Tx,
            timestamp: SimTime::ZERO,
        })
    }

    /// Raw frame bytes as they appear on the wire: MACs, big-endian EtherType, payload.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(ETHERNET_HEADER_LEN + self.payload.len());
        raw.extend_from_slice(&self.destination);
        raw.extend_from_slice(&self.source);
        raw.extend_from_slice(&self.ether_type.to_be_bytes());
        raw.extend_from_slice(&self.payload);
        raw
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self, FormatError> {
        if raw.len() < ETHERNET_HEADER_LEN {
            return Err(FormatError::Truncated {
                needed: ETHERNET_HEADER_LEN,
                available: raw.len(),
            });
        }
        let mut destination = [0u8; MAC_LEN];
        let mut source = [0u8; MAC_LEN];
        destination.copy_from_slice(&raw[..MAC_LEN]);
        source.copy_from_slice(&raw[MAC_LEN..2 * MAC_LEN]);
        let ether_type = u16::from_be_bytes([raw[2 * MAC_LEN], raw[2 * MAC_LEN + 1]]);
        Self::new(destination, source, ether_type, &raw[ETHERNET_HEADER_LEN..])
    }
}

impl BusFrame for EthernetFrame {
    const KIND: BusKind = BusKind::Ethernet;

    fn bus_id(&self) -> u32 {
        u32::from(self.ether_type)
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
        if self.payload.len() > MAX_ETHERNET_PAYLOAD {
            return Err(format!(
                "payload of {} bytes exceeds the {MAX_ETHERNET_PAYLOAD}-byte MTU",
                self.payload.len()
            ));
        }
        Ok(())
    }

    fn encode(&self) -> WireFrame {
        let raw = self.to_raw();
        WireWriter::with_capacity(1 + 8 + 2 + raw.len())
            .u8(self.direction.to_byte())
            .f64(self.timestamp.as_secs_f64())
            .payload(&raw)
            .finish(BusKind::Ethernet)
    }

    fn decode(wire: &WireFrame) -> Result<Self, FormatError> {
        let mut r = WireReader::new(wire, BusKind::Ethernet)?;
        let direction = Direction::from_byte(r.u8()?)?;
        let timestamp = r.f64()?;
        if !timestamp.is_finite() {
            return Err(FormatError::InvalidTime("timestamp"));
        }
        let raw = r.payload(ETHERNET_HEADER_LEN + MAX_ETHERNET_PAYLOAD)?;
        let mut frame = Self::from_raw(raw)?;
        frame.stamp(direction, SimTime::from_secs_f64(timestamp));
        Ok(frame)
    }
}
