//! Bus frame model and the byte-stable wire layout shared by every bus kind.
//!
//! Every frame type encodes to a [`WireFrame`]: a fixed little-endian header
//! followed by a `u16` length and the payload. Decoding is strict about the
//! declared length so a truncated or padded record never yields a frame.

pub mod can;
pub mod ethernet;
pub mod flexray;
pub mod lin;

pub use can::{CanFrame, CanFrameFlags};
pub use ethernet::EthernetFrame;
pub use flexray::{FlexrayChannel, FlexrayFrame, FlexrayHeader, FlexrayHeaderFlags};
pub use lin::{LinChecksumModel, LinFrame};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusKind {
    Can,
    Ethernet,
    Flexray,
    Lin,
}

impl BusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BusKind::Can => "can",
            BusKind::Ethernet => "ethernet",
            BusKind::Flexray => "flexray",
            BusKind::Lin => "lin",
        }
    }
}

impl core::fmt::Display for BusKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Direction::Tx => 1,
            Direction::Rx => 2,
        }
    }

    pub(crate) fn from_byte(value: u8) -> core::result::Result<Self, FormatError> {
        match value {
            1 => Ok(Direction::Tx),
            2 => Ok(Direction::Rx),
            _ => Err(FormatError::InvalidField {
                field: "direction",
                value,
            }),
        }
    }
}

/// Simulation time: seconds since the Unix epoch, relative to the time master.
///
/// Stored as one `f64`, so near present-day epochs adjacent values are about
/// 238 ns apart. [`TimeSlave`](crate::TimeSlave) steps to the next
/// representable value when two reads fall inside one step.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn from_secs_f64(secs: f64) -> Self {
        SimTime(secs)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Smallest representable time strictly after `self`.
    pub fn next_representable(self) -> SimTime {
        if !self.0.is_finite() {
            return self;
        }
        if self.0 == 0.0 {
            return SimTime(f64::from_bits(1));
        }
        let bits = self.0.to_bits();
        SimTime(f64::from_bits(if self.0 > 0.0 { bits + 1 } else { bits - 1 }))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if !self.0.is_finite() {
            return None;
        }
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
    }
}

impl core::fmt::Display for SimTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%d/%m/%Y %H:%M:%S%.6f")),
            None => write!(f, "{}", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FormatError {
    #[error("expected a {expected} frame, got {actual}")]
    KindMismatch { expected: BusKind, actual: BusKind },

    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload of {len} bytes exceeds the {max}-byte maximum")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("invalid {field} value {value:#04x}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("{0} is not a finite time")]
    InvalidTime(&'static str),
}

/// An encoded frame as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    kind: BusKind,
    bytes: Vec<u8>,
}

impl WireFrame {
    pub fn new(kind: BusKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A frame that can travel over one kind of virtual bus.
pub trait BusFrame: Clone + core::fmt::Debug + Send + Sync + 'static {
    const KIND: BusKind;

    /// Identifier used for legacy acknowledgment matching.
    fn bus_id(&self) -> u32;

    fn direction(&self) -> Direction;

    fn timestamp(&self) -> SimTime;

    fn stamp(&mut self, direction: Direction, timestamp: SimTime);

    /// Checks the frame shape before it is handed to the transport.
    fn validate(&self) -> core::result::Result<(), String>;

    fn encode(&self) -> WireFrame;

    fn decode(wire: &WireFrame) -> core::result::Result<Self, FormatError>;
}

pub fn decode<F: BusFrame>(wire: &WireFrame) -> Result<F> {
    F::decode(wire).map_err(|source| Error::Format {
        kind: F::KIND,
        source,
    })
}

pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Appends a `u16` length prefix followed by the payload.
    pub(crate) fn payload(&mut self, value: &[u8]) -> &mut Self {
        let len = u16::try_from(value.len()).unwrap_or(u16::MAX);
        self.u16(len);
        self.bytes(&value[..usize::from(len)])
    }

    pub(crate) fn finish(&mut self, kind: BusKind) -> WireFrame {
        WireFrame::new(kind, core::mem::take(&mut self.buf))
    }
}

pub(crate) struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(wire: &'a WireFrame, expected: BusKind) -> core::result::Result<Self, FormatError> {
        if wire.kind() != expected {
            return Err(FormatError::KindMismatch {
                expected,
                actual: wire.kind(),
            });
        }
        Ok(Self {
            bytes: wire.as_bytes(),
            pos: 0,
        })
    }

    fn take(&mut self, n: usize) -> core::result::Result<&'a [u8], FormatError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(FormatError::Truncated {
                needed: end,
                available: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> core::result::Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> core::result::Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> core::result::Result<u16, FormatError> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn u32(&mut self) -> core::result::Result<u32, FormatError> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn f64(&mut self) -> core::result::Result<f64, FormatError> {
        self.array().map(f64::from_le_bytes)
    }

    pub(crate) fn fixed<const N: usize>(&mut self) -> core::result::Result<[u8; N], FormatError> {
        self.array()
    }

    /// Reads the `u16` length prefix and requires it to cover exactly the rest of the record.
    pub(crate) fn payload(&mut self, max: usize) -> core::result::Result<&'a [u8], FormatError> {
        let declared = usize::from(self.u16()?);
        let actual = self.bytes.len() - self.pos;
        if declared != actual {
            return Err(FormatError::LengthMismatch { declared, actual });
        }
        if declared > max {
            return Err(FormatError::PayloadTooLarge { len: declared, max });
        }
        self.take(declared)
    }
}
