//! Bus controllers: lifecycle state machine, receive queue and transmit correlation.
//!
//! One generic [`BusController`] serves every bus kind. Lifecycle requests are
//! forwarded to the transport, and the local state only changes when the
//! transport's notification arrives on its delivery thread.

pub mod queue;

pub use queue::{ReceiveQueue, DEFAULT_RX_QUEUE_CAPACITY};

use crate::error::{Error, Result, ReturnCode};
use crate::frame::{self, BusFrame, BusKind, CanFrame, Direction, EthernetFrame, FlexrayFrame, LinFrame, SimTime};
use crate::sync::{lock, wait_until};
use crate::time_sync::TimeSlave;
use crate::transport::{ControllerEvents, ControllerLink, FrameEvent, TransmitEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_BITRATE: u32 = 500_000;
pub const DEFAULT_FD_BITRATE: u32 = 2_000_000;
pub const DEFAULT_XL_BITRATE: u32 = 10_000_000;

/// Refusals kept for `wait_for_ack`. The oldest is evicted beyond this.
const MAX_REFUSED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerState {
    Uninitialized,
    Stopped,
    Started,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorState {
    NotAvailable,
    ErrorActive,
    ErrorPassive,
    BusOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateRequest {
    Configure,
    Start,
    Stop,
    Sleep,
    Reset,
}

impl StateRequest {
    pub fn as_str(self) -> &'static str {
        match self {
            StateRequest::Configure => "set_bitrate",
            StateRequest::Start => "start",
            StateRequest::Stop => "stop",
            StateRequest::Sleep => "sleep",
            StateRequest::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ControllerState,
    pub request: StateRequest,
}

impl core::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "cannot {} a controller in state {:?}", self.request.as_str(), self.from)
    }
}

impl ControllerState {
    /// Lifecycle transition table. `Ok(None)` means the request is accepted without a state change.
    pub fn apply(self, request: StateRequest) -> core::result::Result<Option<ControllerState>, InvalidTransition> {
        use ControllerState::*;
        let next = match (self, request) {
            (Uninitialized, StateRequest::Configure) => Stopped,
            (_, StateRequest::Configure) => self,
            (Stopped | Sleep, StateRequest::Start) => Started,
            (Started, StateRequest::Start) => Started,
            (Started | Sleep, StateRequest::Stop) => Stopped,
            (Stopped, StateRequest::Stop) => Stopped,
            (Started | Sleep, StateRequest::Sleep) => Sleep,
            (_, StateRequest::Reset) => Stopped,
            (from, request) => return Err(InvalidTransition { from, request }),
        };
        Ok((next != self).then_some(next))
    }

    /// Error state reported alongside a lifecycle state.
    pub fn error_state(self) -> ErrorState {
        match self {
            ControllerState::Started => ErrorState::ErrorActive,
            _ => ErrorState::NotAvailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmitStatus {
    Transmitted,
    Canceled,
    QueueFull,
    ControllerInactive,
    InvalidFrameFormat,
}

impl TransmitStatus {
    /// Return code a refused transmission surfaces as.
    pub fn return_code(self) -> ReturnCode {
        match self {
            TransmitStatus::Transmitted => ReturnCode::Success,
            TransmitStatus::ControllerInactive => ReturnCode::WrongState,
            TransmitStatus::InvalidFrameFormat => ReturnCode::BadParameter,
            TransmitStatus::QueueFull => ReturnCode::BufferTooSmall,
            TransmitStatus::Canceled => ReturnCode::UnspecifiedError,
        }
    }
}

/// Unique per-send correlation token carried through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransmitId(pub u64);

/// Handle returned by [`BusController::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub token: TransmitId,
    pub bus_id: u32,
}

/// How acknowledgments are matched to sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckCorrelation {
    #[default]
    Token,
    /// First acknowledgment with an equal bus id wins. Ambiguous for concurrent same-id sends.
    BusId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateSettings {
    pub nominal: u32,
    pub fd: u32,
    pub xl: u32,
}

impl BitrateSettings {
    pub fn new() -> Self {
        Self {
            nominal: DEFAULT_BITRATE,
            fd: DEFAULT_FD_BITRATE,
            xl: DEFAULT_XL_BITRATE,
        }
    }
}

impl Default for BitrateSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// A received frame or a transmit acknowledgment, in arrival order.
#[derive(Debug, Clone)]
pub struct Received<F> {
    pub frame: F,
    /// Set when this entry acknowledges one of our own sends.
    pub token: Option<TransmitId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub queued: usize,
    pub dropped: u64,
    pub received: u64,
    pub transmitted: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: ControllerState,
    error_state: ErrorState,
}

pub(crate) struct ControllerShared<F: BusFrame> {
    name: String,
    network: String,
    clock: Arc<TimeSlave>,
    queue: ReceiveQueue<Received<F>>,
    pending: Mutex<HashMap<TransmitId, F>>,
    refused: Mutex<HashMap<TransmitId, TransmitStatus>>,
    status: Mutex<Status>,
    status_changed: Condvar,
    next_token: AtomicU64,
    received: AtomicU64,
    transmitted: AtomicU64,
    failed: AtomicU64,
}

impl<F: BusFrame> ControllerShared<F> {
    pub(crate) fn new(name: &str, network: &str, clock: Arc<TimeSlave>, rx_queue_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            network: network.to_string(),
            clock,
            queue: ReceiveQueue::new(rx_queue_capacity),
            pending: Mutex::new(HashMap::new()),
            refused: Mutex::new(HashMap::new()),
            status: Mutex::new(Status {
                state: ControllerState::Uninitialized,
                error_state: ErrorState::NotAvailable,
            }),
            status_changed: Condvar::new(),
            next_token: AtomicU64::new(1),
            received: AtomicU64::new(0),
            transmitted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

impl<F: BusFrame> ControllerEvents for ControllerShared<F> {
    fn on_frame(&self, event: FrameEvent) {
        match frame::decode::<F>(&event.wire) {
            Ok(mut frame) => {
                frame.stamp(Direction::Rx, self.clock.timestamp());
                self.received.fetch_add(1, Ordering::Relaxed);
                self.queue.push(Received { frame, token: None });
            }
            Err(e) => warn!(controller = %self.name, error = %e, "dropping undecodable frame"),
        }
    }

    fn on_transmit(&self, event: TransmitEvent) {
        let frame = lock(&self.pending).remove(&event.token);
        let Some(mut frame) = frame else {
            debug!(controller = %self.name, token = event.token.0, "acknowledgment for unknown transmission");
            return;
        };
        if event.status == TransmitStatus::Transmitted {
            frame.stamp(Direction::Tx, self.clock.timestamp());
            self.transmitted.fetch_add(1, Ordering::Relaxed);
            self.queue.push(Received {
                frame,
                token: Some(event.token),
            });
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                controller = %self.name,
                bus_id = frame.bus_id(),
                status = ?event.status,
                "transmission not acknowledged"
            );
            let mut refused = lock(&self.refused);
            if refused.len() >= MAX_REFUSED {
                if let Some(oldest) = refused.keys().min().copied() {
                    refused.remove(&oldest);
                }
            }
            refused.insert(event.token, event.status);
            drop(refused);
            self.queue.wake();
        }
    }

    fn on_state_change(&self, state: ControllerState) {
        lock(&self.status).state = state;
        self.status_changed.notify_all();
        info!(controller = %self.name, network = %self.network, ?state, "controller state changed");
    }

    fn on_error_state_change(&self, error_state: ErrorState) {
        lock(&self.status).error_state = error_state;
        self.status_changed.notify_all();
        info!(controller = %self.name, ?error_state, "controller error state changed");
    }
}

/// A virtual bus controller attached to one named network.
pub struct BusController<F: BusFrame> {
    shared: Arc<ControllerShared<F>>,
    link: Box<dyn ControllerLink>,
    correlation: AckCorrelation,
}

pub type CanController = BusController<CanFrame>;
pub type EthernetController = BusController<EthernetFrame>;
pub type FlexrayController = BusController<FlexrayFrame>;
pub type LinController = BusController<LinFrame>;

impl<F: BusFrame> BusController<F> {
    pub(crate) fn new(shared: Arc<ControllerShared<F>>, link: Box<dyn ControllerLink>, correlation: AckCorrelation) -> Self {
        Self {
            shared,
            link,
            correlation,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn network(&self) -> &str {
        &self.shared.network
    }

    pub fn kind(&self) -> BusKind {
        F::KIND
    }

    pub fn correlation(&self) -> AckCorrelation {
        self.correlation
    }

    /// Current master-relative time as seen by this controller.
    pub fn timestamp(&self) -> SimTime {
        self.shared.clock.timestamp()
    }

    /// Last state reported by the transport.
    pub fn state(&self) -> ControllerState {
        lock(&self.shared.status).state
    }

    pub fn error_state(&self) -> ErrorState {
        lock(&self.shared.status).error_state
    }

    pub fn start(&self) -> Result<()> {
        self.request(StateRequest::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.request(StateRequest::Stop)
    }

    pub fn sleep(&self) -> Result<()> {
        self.request(StateRequest::Sleep)
    }

    pub fn reset(&self) -> Result<()> {
        self.request(StateRequest::Reset)
    }

    pub fn set_bitrate(&self, bitrate: BitrateSettings) -> Result<()> {
        debug!(controller = %self.shared.name, ?bitrate, "configuring bitrate");
        self.link.configure(&bitrate)
    }

    fn request(&self, request: StateRequest) -> Result<()> {
        debug!(controller = %self.shared.name, request = request.as_str(), "requesting state change");
        self.link.request(request)
    }

    /// Blocks until the transport has reported `state` or `timeout` elapses.
    pub fn wait_for_state(&self, state: ControllerState, timeout: Duration) -> Result<()> {
        let guard = lock(&self.shared.status);
        let reached = wait_until(&self.shared.status_changed, guard, timeout, |s| s.state == state).1;
        if reached {
            Ok(())
        } else {
            Err(Error::StateTimeout {
                controller: self.shared.name.clone(),
                expected: format!("{state:?}"),
                timeout,
            })
        }
    }

    /// Validates and forwards a frame. The acknowledgment arrives later on the receive queue.
    pub fn send(&self, frame: &F) -> Result<Transmission> {
        frame.validate().map_err(|reason| Error::InvalidFrame {
            controller: self.shared.name.clone(),
            reason,
        })?;
        let token = TransmitId(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        let wire = frame.encode();
        lock(&self.shared.pending).insert(token, frame.clone());
        if let Err(e) = self.link.send(wire, token) {
            lock(&self.shared.pending).remove(&token);
            return Err(e);
        }
        Ok(Transmission {
            token,
            bus_id: frame.bus_id(),
        })
    }

    /// Pops the oldest received frame or acknowledgment.
    pub fn recv(&self) -> Result<F> {
        self.shared
            .queue
            .try_pop()
            .map(|r| r.frame)
            .ok_or_else(|| Error::QueueEmpty(self.shared.name.clone()))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<F> {
        self.shared
            .queue
            .pop_timeout(timeout)
            .map(|r| r.frame)
            .ok_or_else(|| Error::QueueEmpty(self.shared.name.clone()))
    }

    /// Like [`recv`](Self::recv) but keeps the acknowledgment token.
    pub fn recv_entry(&self) -> Option<Received<F>> {
        self.shared.queue.try_pop()
    }

    /// Consumes queue entries until the acknowledgment for `transmission` arrives.
    ///
    /// Entries that do not match are discarded, including frames received from
    /// other participants in the meantime. A transmission the transport refused
    /// fails immediately with the refusal's return code.
    pub fn wait_for_ack(&self, transmission: &Transmission, timeout: Duration) -> Result<F> {
        let deadline = Instant::now().checked_add(timeout);
        let was_refused = || lock(&self.shared.refused).contains_key(&transmission.token);
        loop {
            if let Some(status) = lock(&self.shared.refused).remove(&transmission.token) {
                return Err(Error::transport(status.return_code(), format!("{status:?}"), "send"));
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            let Some(entry) = self.shared.queue.pop_timeout_unless(remaining, &was_refused) else {
                if was_refused() {
                    continue;
                }
                return Err(Error::AckTimeout {
                    controller: self.shared.name.clone(),
                    bus_id: transmission.bus_id,
                    timeout,
                });
            };
            if self.is_ack_for(&entry, transmission) {
                return Ok(entry.frame);
            }
            debug!(
                controller = %self.shared.name,
                bus_id = entry.frame.bus_id(),
                "discarding entry while waiting for acknowledgment"
            );
        }
    }

    fn is_ack_for(&self, entry: &Received<F>, transmission: &Transmission) -> bool {
        match self.correlation {
            AckCorrelation::Token => entry.token == Some(transmission.token),
            AckCorrelation::BusId => entry.frame.direction() == Direction::Tx && entry.frame.bus_id() == transmission.bus_id,
        }
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            queued: self.shared.queue.len(),
            dropped: self.shared.queue.dropped(),
            received: self.shared.received.load(Ordering::Relaxed),
            transmitted: self.shared.transmitted.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl<F: BusFrame> Drop for BusController<F> {
    fn drop(&mut self) {
        self.link.detach();
    }
}

impl<F: BusFrame> core::fmt::Debug for BusController<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusController")
            .field("name", &self.shared.name)
            .field("network", &self.shared.network)
            .field("kind", &F::KIND)
            .field("state", &self.state())
            .finish()
    }
}
