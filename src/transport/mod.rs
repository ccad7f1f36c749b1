//! Seam to the registry-mediated transport.
//!
//! The core only needs participant registration, named controllers per bus
//! kind and network, and topic-matched publish/subscribe with ordered
//! delivery per channel. [`InProcessRegistry`] implements all of it in memory.

pub mod in_process;

pub use in_process::InProcessRegistry;

use crate::controller::{BitrateSettings, ControllerState, ErrorState, StateRequest, TransmitId, TransmitStatus};
use crate::error::{Error, Result, ReturnCode};
use crate::frame::{BusKind, WireFrame};
use crate::pubsub::{DataHandler, DataSpec};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_SCHEME: &str = "silkit";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_REGISTRY_PORT: u16 = 8500;

/// Registry address in `scheme://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryUri {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl RegistryUri {
    pub fn localhost(port: u16) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port,
        }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// `host:port`, suitable for a TCP connect.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RegistryUri {
    fn default() -> Self {
        Self::localhost(DEFAULT_REGISTRY_PORT)
    }
}

impl core::fmt::Display for RegistryUri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for RegistryUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("invalid registry uri '{s}': {why}"));
        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if scheme.is_empty() || host.is_empty() {
            return Err(invalid("empty scheme or host"));
        }
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;
        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl TryFrom<String> for RegistryUri {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RegistryUri> for String {
    fn from(uri: RegistryUri) -> String {
        uri.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl core::fmt::Display for TransportVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{};{}", self.major, self.minor, self.patch, self.build)
    }
}

/// Inbound frame delivered to a controller.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub wire: WireFrame,
}

/// Outcome of one of the controller's own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitEvent {
    pub token: TransmitId,
    pub status: TransmitStatus,
}

/// Handlers a transport invokes on its delivery thread.
pub trait ControllerEvents: Send + Sync {
    fn on_frame(&self, event: FrameEvent);
    fn on_transmit(&self, event: TransmitEvent);
    fn on_state_change(&self, state: ControllerState);
    fn on_error_state_change(&self, error_state: ErrorState);
}

pub trait ControllerLink: Send + Sync {
    /// Applies bitrate settings, configuring an uninitialized controller.
    fn configure(&self, bitrate: &BitrateSettings) -> Result<()>;
    fn request(&self, request: StateRequest) -> Result<()>;
    fn send(&self, wire: WireFrame, token: TransmitId) -> Result<()>;
    fn detach(&self);
}

pub trait PublisherLink: Send + Sync {
    fn publish(&self, payload: &[u8]) -> Result<()>;
    fn detach(&self);
}

pub trait SubscriberLink: Send + Sync {
    fn detach(&self);
}

/// A participant's registered connection to the registry.
pub trait Connection: Send + Sync {
    fn participant(&self) -> &str;

    fn create_controller(
        &self,
        kind: BusKind,
        name: &str,
        network: &str,
        events: Arc<dyn ControllerEvents>,
    ) -> Result<Box<dyn ControllerLink>>;

    fn create_publisher(&self, name: &str, spec: &DataSpec, history: bool) -> Result<Box<dyn PublisherLink>>;

    fn create_subscriber(&self, name: &str, spec: &DataSpec, handler: DataHandler) -> Result<Box<dyn SubscriberLink>>;

    fn disconnect(&self);
}

pub trait Transport: Send + Sync {
    fn version(&self) -> TransportVersion;

    fn connect(&self, uri: &RegistryUri, participant: &str) -> Result<Arc<dyn Connection>>;
}

pub(crate) fn wrong_state(operation: &'static str, reason: impl Into<String>) -> Error {
    Error::transport(ReturnCode::WrongState, reason, operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_parse_and_display() {
        let uri: RegistryUri = "silkit://localhost:8501".parse().unwrap();
        assert_eq!(uri, RegistryUri::localhost(8501));
        assert_eq!(uri.to_string(), "silkit://localhost:8501");
        assert_eq!(uri.socket_address(), "localhost:8501");
    }

    #[test]
    fn test_uri_rejects_malformed() {
        assert!("localhost:8500".parse::<RegistryUri>().is_err());
        assert!("silkit://localhost".parse::<RegistryUri>().is_err());
        assert!("silkit://localhost:port".parse::<RegistryUri>().is_err());
    }

    #[test]
    fn test_version_format() {
        let v = TransportVersion {
            major: 4,
            minor: 0,
            patch: 50,
            build: 7,
        };
        assert_eq!(v.to_string(), "4.0.50;7");
    }
}
