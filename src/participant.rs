use crate::config::{ControllerConfig, LogLevel};
use crate::controller::{
    BusController, CanController, ControllerShared, EthernetController, FlexrayController, LinController, ReceiveQueue,
};
use crate::error::{Error, Result};
use crate::frame::BusFrame;
use crate::pubsub::{DataHandler, DataMessage, DataSpec, Publisher, Subscriber};
use crate::session::Session;
use crate::time_sync::TimeSlave;
use crate::transport::{Connection, ControllerEvents};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Can,
    Ethernet,
    Flexray,
    Lin,
    Publisher,
    Subscriber,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Can => "can",
            EndpointKind::Ethernet => "ethernet",
            EndpointKind::Flexray => "flexray",
            EndpointKind::Lin => "lin",
            EndpointKind::Publisher => "publisher",
            EndpointKind::Subscriber => "subscriber",
        }
    }
}

impl core::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint lookup by insertion index or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for EndpointKey<'_> {
    fn from(index: usize) -> Self {
        EndpointKey::Index(index)
    }
}

impl<'a> From<&'a str> for EndpointKey<'a> {
    fn from(name: &'a str) -> Self {
        EndpointKey::Name(name)
    }
}

impl<'a> From<&'a String> for EndpointKey<'a> {
    fn from(name: &'a String) -> Self {
        EndpointKey::Name(name)
    }
}

impl core::fmt::Display for EndpointKey<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EndpointKey::Index(index) => write!(f, "{index}"),
            EndpointKey::Name(name) => f.write_str(name),
        }
    }
}

struct Endpoints<T> {
    kind: EndpointKind,
    items: IndexMap<String, T>,
}

impl<T> Endpoints<T> {
    fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            items: IndexMap::new(),
        }
    }

    fn get(&self, key: EndpointKey<'_>) -> Result<&T> {
        let found = match key {
            EndpointKey::Index(index) => self.items.get_index(index).map(|(_, item)| item),
            EndpointKey::Name(name) => self.items.get(name),
        };
        found.ok_or_else(|| Error::Lookup {
            kind: self.kind,
            key: key.to_string(),
        })
    }

    /// Resolves the name for a new endpoint: `{participant}_{kind}_{index}` when omitted.
    fn vacant_name(&self, participant: &str, requested: Option<&str>) -> Result<String> {
        let name = match requested {
            Some(name) => name.to_string(),
            None => (self.items.len()..)
                .map(|index| format!("{participant}_{}_{index}", self.kind))
                .find(|candidate| !self.items.contains_key(candidate))
                .unwrap_or_default(),
        };
        if self.items.contains_key(&name) {
            return Err(Error::DuplicateEndpoint {
                participant: participant.to_string(),
                kind: self.kind,
                name,
            });
        }
        Ok(name)
    }

    fn insert(&mut self, name: String, item: T) -> &T {
        self.items.entry(name).or_insert(item)
    }

    fn names(&self) -> Vec<&str> {
        self.items.keys().map(String::as_str).collect()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// A named member of the federation owning controllers and pub/sub endpoints.
pub struct Participant {
    name: String,
    session: Session,
    connection: Arc<dyn Connection>,
    span: Span,
    controller_config: ControllerConfig,
    can: Endpoints<CanController>,
    ethernet: Endpoints<EthernetController>,
    flexray: Endpoints<FlexrayController>,
    lin: Endpoints<LinController>,
    publishers: Endpoints<Publisher>,
    subscribers: Endpoints<Subscriber>,
}

impl Participant {
    pub(crate) fn new(name: String, session: Session, connection: Arc<dyn Connection>) -> Self {
        let span = info_span!("participant", name = %name);
        let controller_config = session.config().controller.clone();
        info!(parent: &span, uri = %session.config().registry_uri, "participant created");
        Self {
            name,
            session,
            connection,
            span,
            controller_config,
            can: Endpoints::new(EndpointKind::Can),
            ethernet: Endpoints::new(EndpointKind::Ethernet),
            flexray: Endpoints::new(EndpointKind::Flexray),
            lin: Endpoints::new(EndpointKind::Lin),
            publishers: Endpoints::new(EndpointKind::Publisher),
            subscribers: Endpoints::new(EndpointKind::Subscriber),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Defaults applied to controllers added from now on.
    pub fn set_controller_config(&mut self, config: ControllerConfig) {
        self.controller_config = config;
    }

    pub fn controller_config(&self) -> &ControllerConfig {
        &self.controller_config
    }

    pub fn add_can_controller(&mut self, name: Option<&str>, network: Option<&str>) -> Result<&CanController> {
        let name = self.can.vacant_name(&self.name, name)?;
        let controller = self.build_controller(&name, network)?;
        Ok(self.can.insert(name, controller))
    }

    pub fn add_ethernet_controller(&mut self, name: Option<&str>, network: Option<&str>) -> Result<&EthernetController> {
        let name = self.ethernet.vacant_name(&self.name, name)?;
        let controller = self.build_controller(&name, network)?;
        Ok(self.ethernet.insert(name, controller))
    }

    pub fn add_flexray_controller(&mut self, name: Option<&str>, network: Option<&str>) -> Result<&FlexrayController> {
        let name = self.flexray.vacant_name(&self.name, name)?;
        let controller = self.build_controller(&name, network)?;
        Ok(self.flexray.insert(name, controller))
    }

    pub fn add_lin_controller(&mut self, name: Option<&str>, network: Option<&str>) -> Result<&LinController> {
        let name = self.lin.vacant_name(&self.name, name)?;
        let controller = self.build_controller(&name, network)?;
        Ok(self.lin.insert(name, controller))
    }

    fn build_controller<F: BusFrame>(&self, name: &str, network: Option<&str>) -> Result<BusController<F>> {
        let network = network.unwrap_or(&self.controller_config.network);
        let clock = Arc::new(TimeSlave::new(
            self.connection.as_ref(),
            name,
            &self.session.config().time_sync,
        )?);
        let shared = Arc::new(ControllerShared::<F>::new(
            name,
            network,
            clock,
            self.controller_config.rx_queue_capacity,
        ));
        let events: Arc<dyn ControllerEvents> = shared.clone();
        let link = self.connection.create_controller(F::KIND, name, network, events)?;
        let controller = BusController::new(shared, link, self.controller_config.ack_correlation);
        controller.set_bitrate(self.controller_config.bitrate_settings())?;
        let kind = F::KIND;
        info!(parent: &self.span, controller = name, network, %kind, "controller added");
        Ok(controller)
    }

    pub fn add_publisher(&mut self, name: Option<&str>, spec: DataSpec, history: bool) -> Result<&Publisher> {
        let name = self.publishers.vacant_name(&self.name, name)?;
        let link = self.connection.create_publisher(&name, &spec, history)?;
        info!(parent: &self.span, publisher = %name, topic = %spec.topic, history, "publisher added");
        let publisher = Publisher::new(&name, spec, link);
        Ok(self.publishers.insert(name, publisher))
    }

    /// Without a handler, received messages are queued and drained with [`Subscriber::recv`].
    pub fn add_subscriber(&mut self, name: Option<&str>, spec: DataSpec, handler: Option<DataHandler>) -> Result<&Subscriber> {
        let name = self.subscribers.vacant_name(&self.name, name)?;
        let (handler, inbox) = match handler {
            Some(handler) => (handler, None),
            None => {
                let inbox = Arc::new(ReceiveQueue::new(self.session.config().subscriber.rx_queue_capacity));
                let queue = Arc::clone(&inbox);
                let handler: DataHandler = Arc::new(move |message: &DataMessage| queue.push(message.clone()));
                (handler, Some(inbox))
            }
        };
        let link = self.connection.create_subscriber(&name, &spec, handler)?;
        info!(parent: &self.span, subscriber = %name, topic = %spec.topic, "subscriber added");
        let subscriber = Subscriber::new(&name, spec, inbox, link);
        Ok(self.subscribers.insert(name, subscriber))
    }

    pub fn can<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&CanController> {
        self.can.get(key.into())
    }

    pub fn ethernet<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&EthernetController> {
        self.ethernet.get(key.into())
    }

    pub fn flexray<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&FlexrayController> {
        self.flexray.get(key.into())
    }

    pub fn lin<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&LinController> {
        self.lin.get(key.into())
    }

    pub fn publisher<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&Publisher> {
        self.publishers.get(key.into())
    }

    pub fn subscriber<'a>(&self, key: impl Into<EndpointKey<'a>>) -> Result<&Subscriber> {
        self.subscribers.get(key.into())
    }

    /// Endpoint names of one kind in insertion order.
    pub fn endpoint_names(&self, kind: EndpointKind) -> Vec<&str> {
        match kind {
            EndpointKind::Can => self.can.names(),
            EndpointKind::Ethernet => self.ethernet.names(),
            EndpointKind::Flexray => self.flexray.names(),
            EndpointKind::Lin => self.lin.names(),
            EndpointKind::Publisher => self.publishers.names(),
            EndpointKind::Subscriber => self.subscribers.names(),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let span = &self.span;
        match level {
            LogLevel::Trace => trace!(parent: span, "{message}"),
            LogLevel::Debug => debug!(parent: span, "{message}"),
            LogLevel::Info => info!(parent: span, "{message}"),
            LogLevel::Warn => warn!(parent: span, "{message}"),
            LogLevel::Error => error!(parent: span, "{message}"),
            LogLevel::Critical => error!(parent: span, critical = true, "{message}"),
            LogLevel::Off => {}
        }
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.subscribers.clear();
        self.publishers.clear();
        self.can.clear();
        self.ethernet.clear();
        self.flexray.clear();
        self.lin.clear();
        self.connection.disconnect();
        self.session.release(&self.name);
        debug!(parent: &self.span, "participant dropped");
    }
}

impl core::fmt::Debug for Participant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.name)
            .field("can", &self.can.names())
            .field("ethernet", &self.ethernet.names())
            .field("flexray", &self.flexray.names())
            .field("lin", &self.lin.names())
            .field("publishers", &self.publishers.names())
            .field("subscribers", &self.subscribers.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_names_skip_taken_slots() {
        let mut endpoints: Endpoints<u8> = Endpoints::new(EndpointKind::Can);
        assert_eq!(endpoints.vacant_name("P", None).unwrap(), "P_can_0");
        endpoints.insert("P_can_1".to_string(), 1);
        assert_eq!(endpoints.vacant_name("P", None).unwrap(), "P_can_2");
    }

    #[test]
    fn test_lookup_error_names_key() {
        let endpoints: Endpoints<u8> = Endpoints::new(EndpointKind::Lin);
        let err = endpoints.get(EndpointKey::Name("Missing")).unwrap_err();
        assert_eq!(err.to_string(), "lin endpoint 'Missing' does not exist");
        let err = endpoints.get(EndpointKey::Index(3)).unwrap_err();
        assert_eq!(err.to_string(), "lin endpoint '3' does not exist");
    }
}
