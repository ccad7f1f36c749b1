use super::{
    wrong_state, Connection, ControllerEvents, ControllerLink, FrameEvent, PublisherLink, RegistryUri, SubscriberLink,
    TransmitEvent, Transport, TransportVersion,
};
use crate::controller::{BitrateSettings, ControllerState, StateRequest, TransmitId, TransmitStatus};
use crate::error::{Error, Result, ReturnCode};
use crate::frame::{BusKind, WireFrame};
use crate::pubsub::{DataHandler, DataMessage, DataSpec};
use crate::sync::lock;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const IN_PROCESS_VERSION: TransportVersion = TransportVersion {
    major: 0,
    minor: 1,
    patch: 0,
    build: 1,
};

type Delivery = Box<dyn FnOnce() + Send>;

/// Registry that lives inside the current process.
///
/// Every handler runs on one dispatcher thread, in the order the events were
/// produced. A panicking handler is logged and does not stop delivery.
pub struct InProcessRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    uri: RegistryUri,
    state: Mutex<RegistryState>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    next_handle: AtomicU64,
}

#[derive(Default)]
struct RegistryState {
    participants: HashSet<String>,
    controllers: HashMap<u64, ControllerEntry>,
    publishers: HashMap<u64, PublisherEntry>,
    subscribers: HashMap<u64, SubscriberEntry>,
}

struct ControllerEntry {
    participant: String,
    name: String,
    kind: BusKind,
    network: String,
    state: ControllerState,
    events: Arc<dyn ControllerEvents>,
}

struct PublisherEntry {
    participant: String,
    name: String,
    spec: DataSpec,
    history: bool,
    last: Option<Vec<u8>>,
}

struct SubscriberEntry {
    participant: String,
    spec: DataSpec,
    handler: DataHandler,
}

impl InProcessRegistry {
    pub fn new(uri: RegistryUri) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("simbus-dispatch".to_string())
            .spawn(move || dispatch(rx))?;
        info!(%uri, "in-process registry listening");
        Ok(Self {
            inner: Arc::new(RegistryInner {
                uri,
                state: Mutex::new(RegistryState::default()),
                deliveries: tx,
                next_handle: AtomicU64::new(1),
            }),
        })
    }

    pub fn uri(&self) -> &RegistryUri {
        &self.inner.uri
    }

    /// Names of the currently connected participants, sorted.
    pub fn participants(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.state).participants.iter().cloned().collect();
        names.sort();
        names
    }

    /// Controllers attached to `network` for the given bus kind, as `participant/controller`.
    pub fn network_members(&self, kind: BusKind, network: &str) -> Vec<String> {
        let state = lock(&self.inner.state);
        let mut members: Vec<String> = state
            .controllers
            .values()
            .filter(|c| c.kind == kind && c.network == network)
            .map(|c| format!("{}/{}", c.participant, c.name))
            .collect();
        members.sort();
        members
    }
}

fn dispatch(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.blocking_recv() {
        if panic::catch_unwind(AssertUnwindSafe(delivery)).is_err() {
            error!("event handler panicked");
        }
    }
    debug!("registry dispatcher stopped");
}

impl RegistryInner {
    // Callers hold the state lock so deliveries keep production order.
    fn deliver(&self, delivery: impl FnOnce() + Send + 'static) {
        if self.deliveries.send(Box::new(delivery)).is_err() {
            error!("registry dispatcher is gone; event lost");
        }
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl Transport for InProcessRegistry {
    fn version(&self) -> TransportVersion {
        IN_PROCESS_VERSION
    }

    fn connect(&self, uri: &RegistryUri, participant: &str) -> Result<Arc<dyn Connection>> {
        if *uri != self.inner.uri {
            return Err(Error::transport(
                ReturnCode::UnspecifiedError,
                format!("no registry listening at {uri}"),
                "connect",
            ));
        }
        let mut state = lock(&self.inner.state);
        if !state.participants.insert(participant.to_string()) {
            return Err(Error::transport(
                ReturnCode::ConfigurationError,
                format!("participant '{participant}' is already connected"),
                "connect",
            ));
        }
        debug!(participant, %uri, "participant connected");
        Ok(Arc::new(InProcessConnection {
            participant: participant.to_string(),
            inner: Arc::clone(&self.inner),
            connected: AtomicBool::new(true),
        }))
    }
}

struct InProcessConnection {
    participant: String,
    inner: Arc<RegistryInner>,
    connected: AtomicBool,
}

impl InProcessConnection {
    fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(wrong_state(operation, format!("participant '{}' is disconnected", self.participant)))
        }
    }
}

impl Connection for InProcessConnection {
    fn participant(&self) -> &str {
        &self.participant
    }

    fn create_controller(
        &self,
        kind: BusKind,
        name: &str,
        network: &str,
        events: Arc<dyn ControllerEvents>,
    ) -> Result<Box<dyn ControllerLink>> {
        self.ensure_connected("create_controller")?;
        let handle = self.inner.handle();
        lock(&self.inner.state).controllers.insert(
            handle,
            ControllerEntry {
                participant: self.participant.clone(),
                name: name.to_string(),
                kind,
                network: network.to_string(),
                state: ControllerState::Uninitialized,
                events,
            },
        );
        debug!(participant = %self.participant, controller = name, %kind, network, "controller attached");
        Ok(Box::new(InProcessControllerLink {
            handle,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn create_publisher(&self, name: &str, spec: &DataSpec, history: bool) -> Result<Box<dyn PublisherLink>> {
        self.ensure_connected("create_publisher")?;
        let handle = self.inner.handle();
        lock(&self.inner.state).publishers.insert(
            handle,
            PublisherEntry {
                participant: self.participant.clone(),
                name: name.to_string(),
                spec: spec.clone(),
                history,
                last: None,
            },
        );
        debug!(participant = %self.participant, publisher = name, topic = %spec.topic, "publisher attached");
        Ok(Box::new(InProcessPublisherLink {
            handle,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn create_subscriber(&self, name: &str, spec: &DataSpec, handler: DataHandler) -> Result<Box<dyn SubscriberLink>> {
        self.ensure_connected("create_subscriber")?;
        let handle = self.inner.handle();
        let mut state = lock(&self.inner.state);
        // Late joiners get the retained sample of every matching history publisher.
        for publisher in state.publishers.values() {
            let Some(last) = publisher.last.as_ref().filter(|_| publisher.history) else {
                continue;
            };
            if spec.matches_publisher(&publisher.spec) {
                let message = DataMessage {
                    topic: publisher.spec.topic.clone(),
                    publisher: publisher.name.clone(),
                    payload: last.clone(),
                };
                let handler = Arc::clone(&handler);
                self.inner.deliver(move || handler(&message));
            }
        }
        state.subscribers.insert(
            handle,
            SubscriberEntry {
                participant: self.participant.clone(),
                spec: spec.clone(),
                handler,
            },
        );
        debug!(participant = %self.participant, subscriber = name, topic = %spec.topic, "subscriber attached");
        Ok(Box::new(InProcessSubscriberLink {
            handle,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let participant = self.participant.as_str();
        // Entries are dropped after the lock is released: a controller's
        // handlers own its time slave, whose subscriber detaches on drop.
        let removed = {
            let mut state = lock(&self.inner.state);
            state.participants.remove(participant);
            (
                split_off(&mut state.controllers, |c| c.participant == participant),
                split_off(&mut state.publishers, |p| p.participant == participant),
                split_off(&mut state.subscribers, |s| s.participant == participant),
            )
        };
        drop(removed);
        debug!(participant, "participant disconnected");
    }
}

fn split_off<T>(entries: &mut HashMap<u64, T>, owned: impl Fn(&T) -> bool) -> Vec<T> {
    let (gone, kept): (HashMap<u64, T>, HashMap<u64, T>) =
        core::mem::take(entries).into_iter().partition(|(_, entry)| owned(entry));
    *entries = kept;
    gone.into_values().collect()
}

impl Drop for InProcessConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct InProcessControllerLink {
    handle: u64,
    inner: Arc<RegistryInner>,
}

impl InProcessControllerLink {
    fn transition(&self, request: StateRequest, bitrate: Option<&BitrateSettings>) -> Result<()> {
        let operation = request.as_str();
        let mut state = lock(&self.inner.state);
        let entry = state
            .controllers
            .get_mut(&self.handle)
            .ok_or_else(|| wrong_state(operation, "controller is detached"))?;
        if let Some(bitrate) = bitrate {
            debug!(controller = %entry.name, nominal = bitrate.nominal, fd = bitrate.fd, xl = bitrate.xl, "bitrate applied");
        }
        let next = entry
            .state
            .apply(request)
            .map_err(|e| wrong_state(operation, e.to_string()))?;
        let Some(next) = next else {
            return Ok(());
        };
        let previous = core::mem::replace(&mut entry.state, next);
        let events = Arc::clone(&entry.events);
        if previous.error_state() != next.error_state() {
            let events = Arc::clone(&events);
            self.inner.deliver(move || events.on_error_state_change(next.error_state()));
        }
        self.inner.deliver(move || events.on_state_change(next));
        Ok(())
    }
}

impl ControllerLink for InProcessControllerLink {
    fn configure(&self, bitrate: &BitrateSettings) -> Result<()> {
        self.transition(StateRequest::Configure, Some(bitrate))
    }

    fn request(&self, request: StateRequest) -> Result<()> {
        self.transition(request, None)
    }

    fn send(&self, wire: WireFrame, token: TransmitId) -> Result<()> {
        let state = lock(&self.inner.state);
        let sender = state
            .controllers
            .get(&self.handle)
            .ok_or_else(|| wrong_state("send", "controller is detached"))?;
        if wire.kind() != sender.kind {
            return Err(Error::transport(
                ReturnCode::BadParameter,
                format!("{} frame on a {} controller", wire.kind(), sender.kind),
                "send",
            ));
        }
        if sender.state != ControllerState::Started {
            let events = Arc::clone(&sender.events);
            self.inner.deliver(move || {
                events.on_transmit(TransmitEvent {
                    token,
                    status: TransmitStatus::ControllerInactive,
                })
            });
            return Ok(());
        }
        let peers = state.controllers.iter().filter(|(handle, c)| {
            **handle != self.handle
                && c.kind == sender.kind
                && c.network == sender.network
                && c.state == ControllerState::Started
        });
        for (_, peer) in peers {
            let events = Arc::clone(&peer.events);
            let wire = wire.clone();
            self.inner.deliver(move || events.on_frame(FrameEvent { wire }));
        }
        let events = Arc::clone(&sender.events);
        self.inner.deliver(move || {
            events.on_transmit(TransmitEvent {
                token,
                status: TransmitStatus::Transmitted,
            })
        });
        Ok(())
    }

    fn detach(&self) {
        let removed = lock(&self.inner.state).controllers.remove(&self.handle);
        drop(removed);
    }
}

struct InProcessPublisherLink {
    handle: u64,
    inner: Arc<RegistryInner>,
}

impl PublisherLink for InProcessPublisherLink {
    fn publish(&self, payload: &[u8]) -> Result<()> {
        let mut guard = lock(&self.inner.state);
        let state = &mut *guard;
        let publisher = state
            .publishers
            .get_mut(&self.handle)
            .ok_or_else(|| wrong_state("publish", "publisher is detached"))?;
        if publisher.history {
            publisher.last = Some(payload.to_vec());
        }
        let message = Arc::new(DataMessage {
            topic: publisher.spec.topic.clone(),
            publisher: publisher.name.clone(),
            payload: payload.to_vec(),
        });
        for subscriber in state.subscribers.values() {
            if subscriber.spec.matches_publisher(&publisher.spec) {
                let handler = Arc::clone(&subscriber.handler);
                let message = Arc::clone(&message);
                self.inner.deliver(move || handler(&*message));
            }
        }
        Ok(())
    }

    fn detach(&self) {
        let removed = lock(&self.inner.state).publishers.remove(&self.handle);
        drop(removed);
    }
}

struct InProcessSubscriberLink {
    handle: u64,
    inner: Arc<RegistryInner>,
}

impl SubscriberLink for InProcessSubscriberLink {
    fn detach(&self) {
        let removed = lock(&self.inner.state).subscribers.remove(&self.handle);
        drop(removed);
    }
}
