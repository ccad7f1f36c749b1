//! Master-relative time: a time master broadcasts beacons, every controller
//! keeps a time slave that extrapolates from the latest one.

use crate::config::TimeSyncConfig;
use crate::error::{Error, Result};
use crate::frame::{FormatError, SimTime};
use crate::pubsub::{DataHandler, DataMessage, DataSpec, Label, Subscriber};
use crate::session::Session;
use crate::sync::{lock, wait_until};
use crate::transport::Connection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const SYNC_TOPIC: &str = "GLOBAL_SYNC_TIME";
pub const SYNC_MEDIA_TYPE: &str = "application/octet-stream";
pub const SYNC_LABEL_KEY: &str = "INSTANCE";
pub const SYNC_LABEL_VALUE: &str = "TIME_SYNC_1S";
pub const TIME_MASTER_PARTICIPANT: &str = "SilKit_TimeMaster";
pub const TIME_MASTER_PUBLISHER: &str = "TIME_MASTER";
pub const TIME_SLAVE_PREFIX: &str = "TIME_SLAVE_";
pub const BEACON_SIZE: usize = 16;

const_assert_eq!(BEACON_SIZE, 2 * core::mem::size_of::<f64>());

/// Broadcast payload: master boot date and the time elapsed since boot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBeacon {
    /// Wall-clock boot date of the master, seconds since the Unix epoch.
    pub epoch_wall_clock: f64,
    pub elapsed_since_boot: Duration,
}

impl TimeBeacon {
    pub fn data_spec() -> DataSpec {
        DataSpec::new(SYNC_TOPIC)
            .with_media_type(SYNC_MEDIA_TYPE)
            .with_label(Label::mandatory(SYNC_LABEL_KEY, SYNC_LABEL_VALUE))
    }

    pub fn to_bytes(&self) -> [u8; BEACON_SIZE] {
        let mut out = [0u8; BEACON_SIZE];
        out[..8].copy_from_slice(&self.epoch_wall_clock.to_le_bytes());
        out[8..].copy_from_slice(&self.elapsed_since_boot.as_secs_f64().to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> core::result::Result<Self, FormatError> {
        if bytes.len() != BEACON_SIZE {
            return Err(FormatError::LengthMismatch {
                declared: BEACON_SIZE,
                actual: bytes.len(),
            });
        }
        let mut epoch = [0u8; 8];
        let mut elapsed = [0u8; 8];
        epoch.copy_from_slice(&bytes[..8]);
        elapsed.copy_from_slice(&bytes[8..]);
        let epoch_wall_clock = f64::from_le_bytes(epoch);
        if !epoch_wall_clock.is_finite() {
            return Err(FormatError::InvalidTime("boot date"));
        }
        let elapsed_since_boot = Duration::try_from_secs_f64(f64::from_le_bytes(elapsed))
            .map_err(|_| FormatError::InvalidTime("elapsed time"))?;
        Ok(Self {
            epoch_wall_clock,
            elapsed_since_boot,
        })
    }

    /// Master time at the instant the beacon was produced.
    pub fn master_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.epoch_wall_clock + self.elapsed_since_boot.as_secs_f64())
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    beacon: TimeBeacon,
    arrived_at: Instant,
    /// Last time handed out since this beacon arrived.
    issued: Option<SimTime>,
}

struct SlaveState {
    snapshot: Mutex<Option<Snapshot>>,
    arrived: Condvar,
    beacons: AtomicU64,
}

impl SlaveState {
    fn update(&self, beacon: TimeBeacon) {
        *lock(&self.snapshot) = Some(Snapshot {
            beacon,
            arrived_at: Instant::now(),
            issued: None,
        });
        self.beacons.fetch_add(1, Ordering::Relaxed);
        self.arrived.notify_all();
    }
}

/// Per-controller view of master time.
pub struct TimeSlave {
    name: String,
    state: Arc<SlaveState>,
    _subscriber: Subscriber,
}

impl TimeSlave {
    /// Subscribes to the beacon channel and blocks until the first beacon arrives.
    pub fn new(connection: &dyn Connection, owner: &str, config: &TimeSyncConfig) -> Result<Self> {
        let name = format!("{TIME_SLAVE_PREFIX}{owner}");
        let state = Arc::new(SlaveState {
            snapshot: Mutex::new(None),
            arrived: Condvar::new(),
            beacons: AtomicU64::new(0),
        });

        let handler_state = Arc::clone(&state);
        let handler_name = name.clone();
        let handler: DataHandler = Arc::new(move |message: &DataMessage| {
            match TimeBeacon::from_bytes(&message.payload) {
                Ok(beacon) => handler_state.update(beacon),
                Err(e) => warn!(slave = %handler_name, error = %e, "ignoring malformed time beacon"),
            }
        });
        let spec = TimeBeacon::data_spec();
        let link = connection.create_subscriber(&name, &spec, handler)?;
        let subscriber = Subscriber::new(&name, spec, None, link);

        let timeout = config.sync_timeout();
        let synced = wait_until(&state.arrived, lock(&state.snapshot), timeout, |s| s.is_some()).1;
        if !synced {
            return Err(Error::SyncTimeout { slave: name, timeout });
        }
        debug!(slave = %name, "time slave synchronized");
        Ok(Self {
            name,
            state,
            _subscriber: subscriber,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Master time extrapolated with the local monotonic clock.
    ///
    /// Strictly increasing between beacons, even for back-to-back calls.
    pub fn timestamp(&self) -> SimTime {
        let mut guard = lock(&self.state.snapshot);
        let Some(snapshot) = guard.as_mut() else {
            return SimTime::ZERO;
        };
        let mut now = SimTime::from_secs_f64(
            snapshot.beacon.master_time().as_secs_f64() + snapshot.arrived_at.elapsed().as_secs_f64(),
        );
        if let Some(issued) = snapshot.issued {
            if now <= issued {
                now = issued.next_representable();
            }
        }
        snapshot.issued = Some(now);
        now
    }

    pub fn last_beacon(&self) -> Option<TimeBeacon> {
        lock(&self.state.snapshot).map(|s| s.beacon)
    }

    pub fn beacons_received(&self) -> u64 {
        self.state.beacons.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for TimeSlave {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimeSlave")
            .field("name", &self.name)
            .field("last_beacon", &self.last_beacon())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMasterState {
    Error,
    Init,
    Started,
    Running,
    Exited,
}

struct MasterStatus {
    state: TimeMasterState,
    failure: Option<Error>,
}

struct MasterShared {
    status: Mutex<MasterStatus>,
    changed: Condvar,
    exit: AtomicBool,
}

impl MasterShared {
    fn set(&self, state: TimeMasterState, failure: Option<Error>) {
        let mut status = lock(&self.status);
        status.state = state;
        if failure.is_some() {
            status.failure = failure;
        }
        self.changed.notify_all();
    }
}

/// Broadcasts [`TimeBeacon`]s from a dedicated thread.
pub struct TimeMaster {
    shared: Arc<MasterShared>,
    thread: Option<JoinHandle<()>>,
}

impl TimeMaster {
    /// Starts the master with its own participant and waits until it is running.
    pub fn start(session: &Session) -> Result<Self> {
        let config = session.config().time_sync.clone();
        let mut participant = session.create_participant(Some(TIME_MASTER_PARTICIPANT))?;
        participant.add_publisher(Some(TIME_MASTER_PUBLISHER), TimeBeacon::data_spec(), true)?;

        let shared = Arc::new(MasterShared {
            status: Mutex::new(MasterStatus {
                state: TimeMasterState::Init,
                failure: None,
            }),
            changed: Condvar::new(),
            exit: AtomicBool::new(false),
        });
        shared.set(TimeMasterState::Started, None);
        let worker = Arc::clone(&shared);
        let interval = config.beacon_interval();
        let thread = thread::Builder::new()
            .name("simbus-time-master".to_string())
            .spawn(move || {
                let boot_date = Utc::now();
                let boot = Instant::now();
                let epoch_wall_clock = epoch_seconds(boot_date);
                worker.set(TimeMasterState::Running, None);
                info!(boot_date = %boot_date, "time master running");
                while !worker.exit.load(Ordering::Acquire) {
                    let beacon = TimeBeacon {
                        epoch_wall_clock,
                        elapsed_since_boot: boot.elapsed(),
                    };
                    let sent = participant
                        .publisher(TIME_MASTER_PUBLISHER)
                        .and_then(|p| p.publish(&beacon.to_bytes()));
                    if let Err(e) = sent {
                        error!(error = %e, "time master failed to publish beacon");
                        worker.set(TimeMasterState::Error, Some(e));
                        return;
                    }
                    let guard = lock(&worker.status);
                    let _ = wait_until(&worker.changed, guard, interval, |_| worker.exit.load(Ordering::Acquire));
                }
                worker.set(TimeMasterState::Exited, None);
                info!("time master exited");
            })?;

        let mut master = Self {
            shared,
            thread: Some(thread),
        };
        let timeout = config.master_start_timeout();
        let (mut status, _) = wait_until(&master.shared.changed, lock(&master.shared.status), timeout, |s| {
            !matches!(s.state, TimeMasterState::Init | TimeMasterState::Started)
        });
        match status.state {
            TimeMasterState::Running => {
                drop(status);
                Ok(master)
            }
            TimeMasterState::Error => {
                let failure = status.failure.take();
                drop(status);
                master.stop();
                Err(failure.unwrap_or(Error::StartTimeout {
                    component: TIME_MASTER_PARTICIPANT.to_string(),
                    timeout,
                }))
            }
            _ => {
                status.state = TimeMasterState::Error;
                drop(status);
                master.stop();
                Err(Error::StartTimeout {
                    component: TIME_MASTER_PARTICIPANT.to_string(),
                    timeout,
                })
            }
        }
    }

    pub fn state(&self) -> TimeMasterState {
        lock(&self.shared.status).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == TimeMasterState::Running
    }

    /// Requests the broadcast loop to exit and joins its thread.
    pub fn stop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        {
            let _guard = lock(&self.shared.status);
            self.shared.changed.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("time master thread panicked");
                self.shared.set(TimeMasterState::Error, None);
            }
        }
    }
}

impl Drop for TimeMaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn epoch_seconds(date: DateTime<Utc>) -> f64 {
    date.timestamp() as f64 + f64::from(date.timestamp_subsec_nanos()) / 1e9
}
